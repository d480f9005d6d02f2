//! Tray configuration.
//!
//! Built once at startup and shared read-only with every component.
//!
//! | key                    | default                                   |
//! |------------------------|-------------------------------------------|
//! | `db_path`              | `/var/lib/kydras-sysagent/agent.db`       |
//! | `control_utility`      | `/usr/local/bin/kya`                      |
//! | `poll_interval_secs`   | `20`                                      |
//! | `state_file`           | `$XDG_DATA_HOME/kydras-sysagent/tray_state.json` |
//! | `terminal`             | `$TERMINAL`, else `x-terminal-emulator`   |
//! | `elevation_helper`     | `pkexec`                                  |
//! | `detail_command`       | `kya-gui`                                 |
//! | `gateway_timeout_secs` | `120` (`0` disables the bound)            |
//! | `notifications`        | `[rich, basic, log]`                      |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// NotificationBackend
// ---------------------------------------------------------------------------

/// Presentation backends, richest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationBackend {
    /// Desktop notification with Apply / Dismiss / Open buttons.
    Rich,
    /// Plain desktop notification, no actions.
    Basic,
    /// A log line; always available.
    Log,
}

impl NotificationBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationBackend::Rich => "rich",
            NotificationBackend::Basic => "basic",
            NotificationBackend::Log => "log",
        }
    }
}

// ---------------------------------------------------------------------------
// TrayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrayConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_control_utility")]
    pub control_utility: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// `None` resolves to the per-user data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_terminal")]
    pub terminal: String,
    #[serde(default = "default_elevation_helper")]
    pub elevation_helper: String,
    #[serde(default = "default_detail_command")]
    pub detail_command: String,
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,
    #[serde(default = "default_notifications")]
    pub notifications: Vec<NotificationBackend>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(paths::DEFAULT_DB_PATH)
}

fn default_control_utility() -> PathBuf {
    PathBuf::from(paths::DEFAULT_CONTROL_UTILITY)
}

fn default_poll_interval() -> u64 {
    20
}

fn default_terminal() -> String {
    std::env::var("TERMINAL")
        .ok()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "x-terminal-emulator".to_string())
}

fn default_elevation_helper() -> String {
    "pkexec".to_string()
}

fn default_detail_command() -> String {
    "kya-gui".to_string()
}

fn default_gateway_timeout() -> u64 {
    120
}

fn default_notifications() -> Vec<NotificationBackend> {
    vec![
        NotificationBackend::Rich,
        NotificationBackend::Basic,
        NotificationBackend::Log,
    ]
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            control_utility: default_control_utility(),
            poll_interval_secs: default_poll_interval(),
            state_file: None,
            terminal: default_terminal(),
            elevation_helper: default_elevation_helper(),
            detail_command: default_detail_command(),
            gateway_timeout_secs: default_gateway_timeout(),
            notifications: default_notifications(),
        }
    }
}

impl TrayConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: TrayConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Poll period; never shorter than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn gateway_timeout(&self) -> Option<Duration> {
        match self.gateway_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(p) => Ok(p.clone()),
            None => paths::default_state_path(),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.poll_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "poll_interval_secs is 0; polling every second instead".into(),
            });
        }

        if !self.control_utility.is_absolute() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "control_utility '{}' is not absolute; elevated runs resolve it via root's PATH",
                    self.control_utility.display()
                ),
            });
        }

        if self.notifications.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "notifications is empty; falling back to log lines".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for backend in &self.notifications {
            if !seen.insert(backend) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("notification backend '{}' listed twice", backend.as_str()),
                });
            }
        }

        if self.terminal.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "terminal is empty; the manual fallback cannot open a window".into(),
            });
        }

        warnings
    }
}
