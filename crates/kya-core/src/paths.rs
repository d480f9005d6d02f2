use crate::error::{KyaError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// System-wide locations owned by the agent
// ---------------------------------------------------------------------------

pub const DEFAULT_DB_PATH: &str = "/var/lib/kydras-sysagent/agent.db";
pub const DEFAULT_CONTROL_UTILITY: &str = "/usr/local/bin/kya";

// ---------------------------------------------------------------------------
// Per-user locations
// ---------------------------------------------------------------------------

pub const APP_DIR: &str = "kydras-sysagent";
pub const STATE_FILE: &str = "tray_state.json";
pub const CONFIG_FILE: &str = "tray.yaml";

/// `$XDG_DATA_HOME/kydras-sysagent`, falling back to `~/.local/share/kydras-sysagent`.
pub fn user_data_dir() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(KyaError::HomeNotFound)?;
    Ok(xdg_dir(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        &home,
        ".local/share",
    ))
}

/// `$XDG_CONFIG_HOME/kydras-sysagent`, falling back to `~/.config/kydras-sysagent`.
pub fn user_config_dir() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(KyaError::HomeNotFound)?;
    Ok(xdg_dir(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        &home,
        ".config",
    ))
}

pub fn default_state_path() -> Result<PathBuf> {
    Ok(user_data_dir()?.join(STATE_FILE))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(user_config_dir()?.join(CONFIG_FILE))
}

// XDG says relative values must be ignored.
fn xdg_dir(explicit: Option<PathBuf>, home: &Path, fallback: &str) -> PathBuf {
    match explicit {
        Some(base) if base.is_absolute() => base.join(APP_DIR),
        _ => home.join(fallback).join(APP_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_dir_prefers_absolute_override() {
        let dir = xdg_dir(
            Some(PathBuf::from("/data")),
            Path::new("/home/op"),
            ".local/share",
        );
        assert_eq!(dir, PathBuf::from("/data/kydras-sysagent"));
    }

    #[test]
    fn xdg_dir_ignores_relative_override() {
        let dir = xdg_dir(
            Some(PathBuf::from("relative")),
            Path::new("/home/op"),
            ".local/share",
        );
        assert_eq!(dir, PathBuf::from("/home/op/.local/share/kydras-sysagent"));
    }

    #[test]
    fn xdg_dir_falls_back_to_home() {
        let dir = xdg_dir(None, Path::new("/home/op"), ".config");
        assert_eq!(dir, PathBuf::from("/home/op/.config/kydras-sysagent"));
    }
}
