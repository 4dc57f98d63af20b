//! Path utilities

use std::path::PathBuf;

/// Data directory (~/.waypoint)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".waypoint"))
        .unwrap_or_else(|| PathBuf::from(".waypoint"))
}

/// Config file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}
