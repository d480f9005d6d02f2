use anyhow::Context;
use kya_core::config::TrayConfig;
use kya_core::paths;
use std::path::{Path, PathBuf};

/// Command-line values that win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub db: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub interval: Option<u64>,
}

/// Resolve the effective configuration.
///
/// Priority:
/// 1. flags / environment (`overrides`)
/// 2. the file at `explicit`, else the per-user default path
/// 3. built-in defaults
pub fn load(explicit: Option<&Path>, overrides: &Overrides) -> anyhow::Result<TrayConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match paths::default_config_path() {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "no per-user config location; using defaults");
                return Ok(apply(TrayConfig::default(), overrides));
            }
        },
    };
    let config = TrayConfig::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    Ok(apply(config, overrides))
}

fn apply(mut config: TrayConfig, overrides: &Overrides) -> TrayConfig {
    if let Some(db) = &overrides.db {
        config.db_path = db.clone();
    }
    if let Some(state) = &overrides.state {
        config.state_file = Some(state.clone());
    }
    if let Some(secs) = overrides.interval {
        config.poll_interval_secs = secs;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_explicit_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load(Some(&dir.path().join("none.yaml")), &Overrides::default()).unwrap();
        assert_eq!(cfg.poll_interval_secs, 20);
    }

    #[test]
    fn flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tray.yaml");
        std::fs::write(&path, "poll_interval_secs: 60\ndb_path: /srv/agent.db\n").unwrap();
        let overrides = Overrides {
            db: Some(dir.path().join("other.db")),
            state: None,
            interval: Some(5),
        };
        let cfg = load(Some(&path), &overrides).unwrap();
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.db_path, dir.path().join("other.db"));
        assert_eq!(cfg.state_file, None);
    }

    #[test]
    fn broken_file_names_its_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tray.yaml");
        std::fs::write(&path, "notifications: [smoke-signals]\n").unwrap();
        let err = load(Some(&path), &Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("tray.yaml"));
    }
}
