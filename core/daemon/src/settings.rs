//! Daemon runtime settings (`daemon.toml`).
//!
//! Every field is optional; a missing file means defaults.
//!
//! ```toml
//! [paths]
//! config_file = "/data/walks/config.ini"
//! log_root = "/data/walks/logs"
//!
//! [session]
//! cooldown_ms = 2000
//!
//! [fix]
//! timeout_ms = 5000
//! max_age_ms = 200
//! high_accuracy = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use steplogger_core::AppPaths;

use crate::fix::FixRequest;
use crate::host::HostSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSettings {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub fix: FixSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    pub config_file: Option<PathBuf>,
    pub log_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionSettings {
    /// How long the waypoint button stays disabled after a recorded press.
    pub cooldown_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { cooldown_ms: 2000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FixSettings {
    pub timeout_ms: u64,
    pub max_age_ms: u64,
    pub high_accuracy: bool,
}

impl Default for FixSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_age_ms: 200,
            high_accuracy: true,
        }
    }
}

impl DaemonSettings {
    pub fn config_file(&self, paths: &AppPaths) -> PathBuf {
        self.paths
            .config_file
            .clone()
            .unwrap_or_else(|| paths.config_file())
    }

    pub fn host_settings(&self, paths: &AppPaths) -> HostSettings {
        HostSettings {
            log_root: self
                .paths
                .log_root
                .clone()
                .unwrap_or_else(|| paths.log_root()),
            cooldown: Duration::from_millis(self.session.cooldown_ms),
            fix_request: FixRequest {
                timeout: Duration::from_millis(self.fix.timeout_ms),
                max_age: Duration::from_millis(self.fix.max_age_ms),
                high_accuracy: self.fix.high_accuracy,
            },
        }
    }
}

pub fn load_settings(path: &Path) -> Result<DaemonSettings, String> {
    if !path.exists() {
        return Ok(DaemonSettings::default());
    }

    let content = fs_err::read_to_string(path)
        .map_err(|err| format!("Failed to read daemon settings {}: {}", path.display(), err))?;
    toml::from_str::<DaemonSettings>(&content)
        .map_err(|err| format!("Failed to parse daemon settings {}: {}", path.display(), err))
}
