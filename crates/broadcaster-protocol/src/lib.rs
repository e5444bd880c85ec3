pub mod config;
pub mod platform;
pub mod protocol;

pub use config::{CacheConfig, ConfigError, ConnectionConfig, CoordinatorConfig, EndpointConfig, GpioConfig};
pub use protocol::{
    AuthenticateMessage, CodecError, EntrySpec, FileSpec, FilesMessage, Frame, Message,
    PlaybackStatus, PlaylistSpec, PlaylistsMessage, StatusMessage, StopMessage, MAX_FRAME_LEN,
};
