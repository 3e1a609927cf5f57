use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_storage_sqlite::SessionOptions;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub lease: LeaseConfig,
    pub host: HostConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub seconds: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostConfig {
    /// Logical host the work is done for.
    pub name: String,
    /// Worker instance holding leases; defaults to `name`.
    #[serde(default)]
    pub workhost: Option<String>,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Config {
    pub fn default_for(host_name: &str) -> Self {
        Self {
            database: DatabaseConfig {
                path: ".fleet/fleet.db".to_string(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            lease: LeaseConfig { seconds: 300 },
            host: HostConfig {
                name: host_name.to_string(),
                workhost: None,
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Override file values with `FLEET_*` variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("FLEET_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(secs) = var("FLEET_LEASE_SECONDS") {
            self.lease.seconds = secs
                .trim()
                .parse()
                .with_context(|| format!("FLEET_LEASE_SECONDS is not a number: {secs}"))?;
        }
        if let Some(host) = var("FLEET_HOST") {
            self.host.name = host;
        }
        if let Some(workhost) = var("FLEET_WORKHOST") {
            self.host.workhost = Some(workhost);
        }
        Ok(())
    }

    pub fn workhost(&self) -> &str {
        self.host.workhost.as_deref().unwrap_or(&self.host.name)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            lease_seconds: self.lease.seconds,
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
        }
    }

    /// Database path with `~` expanded; relative paths are taken from `root`.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.database.path).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join("fleet.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = Config::config_path(dir.path());
        let mut cfg = Config::default_for("builder-01");
        cfg.host.workhost = Some("builder-01-slot2".to_string());
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.host.name, "builder-01");
        assert_eq!(loaded.workhost(), "builder-01-slot2");
        assert_eq!(loaded.lease.seconds, 300);
        assert_eq!(loaded.db_path(dir.path()), dir.path().join(".fleet/fleet.db"));
    }

    #[test]
    fn missing_optional_keys_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(
            &path,
            "[database]\npath = \"/srv/fleet.db\"\n\n[lease]\nseconds = 60\n\n[host]\nname = \"mac\"\n",
        )
        .unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.database.busy_timeout_ms, 5_000);
        assert_eq!(cfg.workhost(), "mac");
        assert_eq!(cfg.db_path(dir.path()), PathBuf::from("/srv/fleet.db"));
        assert_eq!(cfg.session_options().lease_seconds, 60);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("FLEET_DATABASE_PATH", "/tmp/other.db"),
            ("FLEET_LEASE_SECONDS", "15"),
            ("FLEET_WORKHOST", "pool-3"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default_for("linux");
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.database.path, "/tmp/other.db");
        assert_eq!(cfg.lease.seconds, 15);
        assert_eq!(cfg.host.name, "linux");
        assert_eq!(cfg.workhost(), "pool-3");

        let bad: HashMap<&str, &str> = [("FLEET_LEASE_SECONDS", "soon")].into_iter().collect();
        assert!(cfg.apply_env(|k| bad.get(k).map(|v| v.to_string())).is_err());
    }
}
