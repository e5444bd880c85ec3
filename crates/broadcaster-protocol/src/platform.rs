use std::path::PathBuf;

/// Default TCP port the coordinator listens on for endpoint sessions.
pub const COORDINATOR_TCP_PORT: u16 = 9876;

/// Default bind host for the coordinator's endpoint-facing listener.
pub const COORDINATOR_TCP_HOST: &str = "0.0.0.0";

/// Default bind address for the coordinator's HTTP file-download server.
pub const COORDINATOR_HTTP_BIND: &str = "0.0.0.0:8787";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/broadcaster/ (XDG standard)
    // instead of macOS Application Support for consistency.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("broadcaster")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("broadcaster")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("broadcaster")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("broadcaster")
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn cache_dir() -> PathBuf {
    // On macOS and Linux, use ~/.cache/broadcaster/ (XDG standard) instead
    // of macOS ~/Library/Caches/ for consistency.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(temp_dir)
            .join(".cache")
            .join("broadcaster")
    }
    #[cfg(windows)]
    {
        dirs::cache_dir().unwrap_or_else(temp_dir).join("broadcaster")
    }
}
