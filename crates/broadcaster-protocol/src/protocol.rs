use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest declared frame length this crate will accept. A frame whose
/// header claims more than this is dropped and the connection
/// resynchronizes by skipping exactly that many bytes (see
/// `Frame::try_decode`).
pub const MAX_FRAME_LEN: usize = 16 * 1024;

pub const AUTHENTICATE_TYPE: &str = "authenticate";
pub const FILES_TYPE: &str = "files";
pub const PLAYLISTS_TYPE: &str = "playlists";
pub const STOP_TYPE: &str = "stop";
pub const STATUS_TYPE: &str = "status";

pub const START_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
pub const LOCAL_TIME_FORMAT: &str = "%a %e %b %Y %H:%M:%S";

/// Playback status values carried in [`StatusMessage::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Delay,
    ChannelInUse,
    Playing,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        PlaybackStatus::Idle
    }
}

/// A single audio file the coordinator's manifest knows about. Identity is
/// `name`; `hash` is a SHA-256 content fingerprint, lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Hash")]
    pub hash: String,
}

/// A single scheduled playback within a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "DelaySeconds")]
    pub delay_seconds: i64,
    #[serde(rename = "IsRelative")]
    pub is_relative: bool,
}

/// An ordered list of timed audio-file references anchored to a wall-clock
/// start time. `start_time` is a naive `YYYY-MM-DDThh:mm` string interpreted
/// in the endpoint's configured time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSpec {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "StartTime")]
    pub start_time: String,
    #[serde(rename = "Entries")]
    pub entries: Vec<EntrySpec>,
}

/// `{"T":"authenticate","Token":"<hex>"}` — first message of a session, sent
/// endpoint -> coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateMessage {
    #[serde(rename = "Token")]
    pub token: String,
}

/// `{"T":"files","Files":[...]}` — coordinator -> endpoint snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesMessage {
    #[serde(rename = "Files")]
    pub files: Vec<FileSpec>,
}

/// `{"T":"playlists","Playlists":[...]}` — coordinator -> endpoint snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistsMessage {
    #[serde(rename = "Playlists")]
    pub playlists: Vec<PlaylistSpec>,
}

/// `{"T":"stop"}` — coordinator -> endpoint; cancel any in-flight playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopMessage;

/// `{"T":"status", ...}` — endpoint -> coordinator, periodic.
///
/// Exactly one of `delay_seconds_remaining`, `playback_seconds_elapsed`, and
/// `waiting_for_channel_seconds` is meaningful at a time, matching `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "Status")]
    pub status: PlaybackStatus,
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Playlist")]
    pub playlist: String,
    #[serde(rename = "DelaySecondsRemaining")]
    pub delay_seconds_remaining: i64,
    #[serde(rename = "PlaybackSecondsElapsed")]
    pub playback_seconds_elapsed: i64,
    #[serde(rename = "WaitingForChannelSeconds")]
    pub waiting_for_channel_seconds: i64,
    #[serde(rename = "PTT")]
    pub ptt: bool,
    #[serde(rename = "COS")]
    pub cos: bool,
    #[serde(rename = "FilesInSync")]
    pub files_in_sync: bool,
    #[serde(rename = "LocalTime")]
    pub local_time: String,
    #[serde(rename = "TimeZone")]
    pub time_zone: String,
}

impl StatusMessage {
    /// A fresh idle status for a radio that has just authenticated, before
    /// any playlist has ever run.
    pub fn idle(time_zone: &str) -> Self {
        StatusMessage {
            status: PlaybackStatus::Idle,
            filename: String::new(),
            playlist: String::new(),
            delay_seconds_remaining: 0,
            playback_seconds_elapsed: 0,
            waiting_for_channel_seconds: 0,
            ptt: false,
            cos: false,
            files_in_sync: false,
            local_time: String::new(),
            time_zone: time_zone.to_string(),
        }
    }
}

/// The five discriminated message kinds, decoded from a `T`-tagged JSON
/// object.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Authenticate(AuthenticateMessage),
    Files(FilesMessage),
    Playlists(PlaylistsMessage),
    Stop(StopMessage),
    Status(StatusMessage),
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Authenticate(_) => AUTHENTICATE_TYPE,
            Message::Files(_) => FILES_TYPE,
            Message::Playlists(_) => PLAYLISTS_TYPE,
            Message::Stop(_) => STOP_TYPE,
            Message::Status(_) => STATUS_TYPE,
        }
    }

    /// Serialize to a single JSON object carrying `T` plus the payload's own
    /// fields, matching the wire format (`T` is a sibling field, not a
    /// nested discriminant).
    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        let value = match self {
            Message::Authenticate(m) => tag_value(AUTHENTICATE_TYPE, m)?,
            Message::Files(m) => tag_value(FILES_TYPE, m)?,
            Message::Playlists(m) => tag_value(PLAYLISTS_TYPE, m)?,
            Message::Stop(_) => serde_json::json!({ "T": STOP_TYPE }),
            Message::Status(m) => tag_value(STATUS_TYPE, m)?,
        };
        Ok(serde_json::to_vec(&value)?)
    }

    /// Parse a single frame's bytes into a tagged message. Unknown tags and
    /// malformed payloads are reported as [`CodecError`] rather than
    /// panicking — callers decide whether that drops the frame or tears
    /// down the connection.
    pub fn parse(data: &[u8]) -> Result<Message, CodecError> {
        #[derive(Deserialize)]
        struct Tag {
            #[serde(rename = "T")]
            t: String,
        }
        let tag: Tag = serde_json::from_slice(data)?;
        match tag.t.as_str() {
            AUTHENTICATE_TYPE => Ok(Message::Authenticate(serde_json::from_slice(data)?)),
            FILES_TYPE => Ok(Message::Files(serde_json::from_slice(data)?)),
            PLAYLISTS_TYPE => Ok(Message::Playlists(serde_json::from_slice(data)?)),
            STOP_TYPE => Ok(Message::Stop(StopMessage)),
            STATUS_TYPE => Ok(Message::Status(serde_json::from_slice(data)?)),
            other => Err(CodecError::UnknownTag(other.to_string())),
        }
    }
}

fn tag_value<T: Serialize>(tag: &str, payload: &T) -> Result<serde_json::Value, CodecError> {
    let mut value = serde_json::to_value(payload)?;
    if let serde_json::Value::Object(ref mut map) = value {
        map.insert("T".to_string(), serde_json::Value::String(tag.to_string()));
    }
    Ok(value)
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    #[error("frame of {0} bytes exceeds the {max} byte cap", max = MAX_FRAME_LEN)]
    FrameTooLarge(usize),
}

/// Length-prefixed framing used over the duplex TCP stream: a 4-byte
/// big-endian length prefix followed by that many bytes of JSON.
pub struct Frame;

impl Frame {
    /// Encode a message as a length-prefixed frame ready to write to the
    /// socket.
    pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
        let body = message.to_json()?;
        if body.len() > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Attempt to pull one complete frame out of `buf`. Returns `Some((msg,
    /// consumed))` on success, `Ok(None)` when `buf` doesn't yet contain a
    /// full frame. A declared length over [`MAX_FRAME_LEN`] is reported as
    /// `Err((FrameTooLarge, consumed))` with `consumed` covering exactly
    /// that many bytes (header included) so the caller can resynchronize by
    /// draining them once they've all arrived.
    pub fn try_decode(buf: &[u8]) -> Result<Option<(Message, usize)>, (CodecError, usize)> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let total = 4 + len;
        if len > MAX_FRAME_LEN {
            let consumed = total.min(buf.len()).max(4);
            return Err((CodecError::FrameTooLarge(len), consumed));
        }
        if buf.len() < total {
            return Ok(None);
        }
        match Message::parse(&buf[4..total]) {
            Ok(message) => Ok(Some((message, total))),
            Err(e) => Err((e, total)),
        }
    }
}
