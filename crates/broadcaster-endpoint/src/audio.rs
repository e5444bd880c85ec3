//! Audio decode, resample, and output.
//!
//! No teacher counterpart exists: `ja-mf-r4dio`'s own radio-tui talks to an
//! external `mpv` process over its JSON IPC socket rather than decoding audio
//! itself. This module is grounded instead in `examples/coissac-pmomusic/pmoaudio`'s
//! `audio_sink.rs` for the cpal-output-on-a-dedicated-thread shape (`cpal::Stream`
//! is `!Send`, so it cannot live across an `.await` inside the scheduler's task)
//! and in the rubato/symphonia decode chain from
//! `other_examples/b239370d_ontley-amuseing__src-playback.rs.rs`. Clips are
//! short pre-recorded station IDs and jingles (spec Non-goals exclude
//! real-time streaming), so the whole file is decoded and resampled into
//! memory up front rather than fed through a streaming pipeline.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tokio::sync::watch;

/// Frame count rubato resamples per call; arbitrary but must match what
/// `FftFixedIn` was constructed with.
const RESAMPLE_CHUNK: usize = 1024;
/// How often the playback-monitor loop polls for stream completion.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unrecognised file extension (only .wav and .mp3 are supported)")]
    UnsupportedExtension,
    #[error("failed to open audio file: {0}")]
    Open(#[source] std::io::Error),
    #[error("symphonia probe/format error: {0}")]
    Format(#[source] SymphoniaError),
    #[error("no supported audio track found in file")]
    NoTrack,
    #[error("no output audio device available")]
    NoOutputDevice,
    #[error("output device does not support this sample format: {0:?}")]
    UnsupportedSampleFormat(SampleFormat),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[source] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[source] cpal::PlayStreamError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Finished,
    Cancelled,
}

struct DecodedAudio {
    /// Interleaved samples at the file's own sample rate and channel count.
    interleaved: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

/// Decodes `path`, resamples to the default output device's native rate, and
/// plays it. Returns once the clip finishes naturally or `cancel` fires.
/// `cancel` is a generation counter (see `scheduler.rs`): any change is
/// treated as a stop request, matching the session's one-shot `STOP` frame.
pub async fn play_file(
    path: &Path,
    cancel: &mut watch::Receiver<u64>,
) -> Result<PlayOutcome, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;
    let config = device
        .default_output_config()
        .map_err(|_| AudioError::NoOutputDevice)?;
    let output_rate = config.sample_rate().0;
    let output_channels = config.channels();

    let owned_path = path.to_path_buf();
    let samples = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, AudioError> {
        let decoded = decode_file(&owned_path)?;
        Ok(resample_and_remix(decoded, output_rate, output_channels))
    })
    .await
    .expect("decode/resample task panicked")?;

    let buffer = Arc::new(Mutex::new(VecDeque::from(samples)));
    let finished = Arc::new(AtomicBool::new(false));

    let (ready_rx, stop_tx, join_handle) =
        spawn_output_thread(device, config, buffer, finished.clone());
    let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
        .await
        .expect("output thread readiness channel panicked");
    match ready {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(AudioError::NoOutputDevice),
    }

    let outcome = loop {
        if finished.load(Ordering::Acquire) {
            break PlayOutcome::Finished;
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            changed = cancel.changed() => {
                if changed.is_ok() {
                    break PlayOutcome::Cancelled;
                }
            }
        }
    };

    let _ = stop_tx.send(());
    let _ = tokio::task::spawn_blocking(move || join_handle.join()).await;
    Ok(outcome)
}

/// Dispatches on `.wav`/`.mp3` (spec §4.d), decodes the whole file, and
/// returns its samples interleaved at the file's own rate/channel count.
fn decode_file(path: &Path) -> Result<DecodedAudio, AudioError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase());
    let ext = match ext.as_deref() {
        Some("wav") | Some("mp3") => ext.clone().unwrap(),
        _ => return Err(AudioError::UnsupportedExtension),
    };

    let file = std::fs::File::open(path).map_err(AudioError::Open)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(&ext);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(AudioError::Format)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::NoTrack)?
        .clone();
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(AudioError::Format)?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Format(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                append_interleaved(decoded, &mut interleaved);
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AudioError::Format(e)),
        }
    }

    Ok(DecodedAudio {
        interleaved,
        sample_rate,
        channels,
    })
}

fn append_interleaved(decoded: AudioBufferRef<'_>, out: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let duration = decoded.capacity() as u64;
    let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
    sample_buf.copy_interleaved_ref(decoded);
    out.extend_from_slice(sample_buf.samples());
}

/// Resamples to `output_rate` if it differs from the file's own rate, then
/// remixes channel count to whatever the output device expects.
fn resample_and_remix(audio: DecodedAudio, output_rate: u32, output_channels: u16) -> Vec<f32> {
    let planar = deinterleave(&audio.interleaved, audio.channels);
    let planar = if audio.sample_rate == output_rate {
        planar
    } else {
        resample_planar(planar, audio.sample_rate, output_rate)
    };
    remix_and_interleave(planar, output_channels)
}

fn deinterleave(interleaved: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let channels = (channels as usize).max(1);
    let mut planes = vec![Vec::with_capacity(interleaved.len() / channels); channels];
    for frame in interleaved.chunks(channels) {
        for (c, sample) in frame.iter().enumerate() {
            planes[c].push(*sample);
        }
    }
    planes
}

fn resample_planar(planar: Vec<Vec<f32>>, from_rate: u32, to_rate: u32) -> Vec<Vec<f32>> {
    let channels = planar.len().max(1);
    let mut resampler = match FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        1,
        channels,
    ) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("failed to build resampler ({e}), playing at source rate");
            return planar;
        }
    };

    let len = planar.first().map(|p| p.len()).unwrap_or(0);
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut cursor = 0;
    while cursor < len {
        let end = (cursor + RESAMPLE_CHUNK).min(len);
        let chunk: Vec<Vec<f32>> = planar
            .iter()
            .map(|channel| {
                let mut segment = channel[cursor..end].to_vec();
                segment.resize(RESAMPLE_CHUNK, 0.0);
                segment
            })
            .collect();
        if let Ok(produced) = resampler.process(&chunk, None) {
            for (c, data) in produced.into_iter().enumerate() {
                output[c].extend(data);
            }
        }
        cursor = end;
    }
    output
}

fn remix_and_interleave(planar: Vec<Vec<f32>>, output_channels: u16) -> Vec<f32> {
    let in_channels = planar.len().max(1);
    let out_channels = (output_channels as usize).max(1);
    let frames = planar.first().map(|p| p.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * out_channels);
    for frame in 0..frames {
        for c in 0..out_channels {
            let src = if in_channels == out_channels {
                c
            } else if in_channels == 1 {
                0
            } else {
                c % in_channels
            };
            out.push(planar[src][frame]);
        }
    }
    out
}

type ReadySignal = std_mpsc::Receiver<Result<(), AudioError>>;
type StopSignal = std_mpsc::Sender<()>;

/// Builds and plays the cpal output stream on a dedicated OS thread (`cpal::Stream`
/// is `!Send`, so it cannot be held across an `.await` in the caller's task),
/// and blocks that thread on `stop_rx` until told to tear the stream down.
fn spawn_output_thread(
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    finished: Arc<AtomicBool>,
) -> (ReadySignal, StopSignal, std::thread::JoinHandle<()>) {
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();

    let handle = std::thread::spawn(move || {
        let result = build_output_stream(&device, &config, buffer, finished)
            .and_then(|stream| stream.play().map(|_| stream).map_err(AudioError::PlayStream));
        match result {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    (ready_rx, stop_tx, handle)
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    finished: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError> {
    let stream_config: cpal::StreamConfig = config.clone().into();
    let err_fn = |err| tracing::error!("audio output stream error: {err}");

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| fill(&buffer, &finished, data, |s| s),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _| {
                fill(&buffer, &finished, data, |s| (s * i16::MAX as f32) as i16)
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [u16], _| {
                fill(&buffer, &finished, data, |s| {
                    ((s * 0.5 + 0.5) * u16::MAX as f32) as u16
                })
            },
            err_fn,
            None,
        ),
        other => return Err(AudioError::UnsupportedSampleFormat(other)),
    };

    stream.map_err(AudioError::BuildStream)
}

fn fill<T: SizedSample + Default>(
    buffer: &Mutex<VecDeque<f32>>,
    finished: &AtomicBool,
    data: &mut [T],
    convert: impl Fn(f32) -> T,
) {
    let mut buf = buffer.lock().expect("audio buffer mutex poisoned");
    for slot in data.iter_mut() {
        match buf.pop_front() {
            Some(sample) => *slot = convert(sample),
            None => {
                *slot = T::default();
                finished.store(true, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_splits_stereo_frames() {
        let interleaved = vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let planes = deinterleave(&interleaved, 2);
        assert_eq!(planes[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(planes[1], vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn remix_duplicates_mono_into_stereo() {
        let planar = vec![vec![0.5, 0.25]];
        let out = remix_and_interleave(planar, 2);
        assert_eq!(out, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn remix_downmixes_extra_channels_by_wrapping() {
        let planar = vec![vec![1.0], vec![2.0], vec![3.0]];
        let out = remix_and_interleave(planar, 2);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn decode_file_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flac");
        std::fs::write(&path, b"not really audio").unwrap();
        let err = decode_file(&path).unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedExtension));
    }

    #[test]
    fn decode_file_reports_open_failure_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.wav");
        let err = decode_file(&path).unwrap_err();
        assert!(matches!(err, AudioError::Open(_)));
    }
}
