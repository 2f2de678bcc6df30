//! Well-known locations for StepLogger files.
//!
//! Everything lives under one application root:
//!
//! ```text
//! ~/.steplogger/            (or $STEPLOGGER_HOME)
//! ├── config.ini            waypoint script + other key=value settings
//! ├── daemon.toml           optional daemon runtime settings
//! ├── daemon.sock           remote command socket
//! ├── logs/                 one directory per logging session
//! └── client-logs/          CLI diagnostics
//! ```

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

pub const HOME_ENV: &str = "STEPLOGGER_HOME";

const APP_DIR: &str = ".steplogger";
const CONFIG_FILE: &str = "config.ini";
const SETTINGS_FILE: &str = "daemon.toml";
const SOCKET_NAME: &str = "daemon.sock";
const LOG_DIR: &str = "logs";
const CLIENT_LOG_DIR: &str = "client-logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    /// Resolves the application root from `$STEPLOGGER_HOME`, falling back to
    /// `~/.steplogger`.
    pub fn resolve() -> Result<Self> {
        if let Ok(value) = env::var(HOME_ENV) {
            if !value.trim().is_empty() {
                return Ok(Self::with_root(value));
            }
        }
        let home = dirs::home_dir().ok_or(CoreError::HomeNotFound)?;
        Ok(Self::with_root(home.join(APP_DIR)))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn socket(&self) -> PathBuf {
        self.root.join(SOCKET_NAME)
    }

    pub fn log_root(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn client_log_dir(&self) -> PathBuf {
        self.root.join(CLIENT_LOG_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = AppPaths::with_root("/tmp/steplogger-root");
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/steplogger-root/config.ini")
        );
        assert_eq!(paths.log_root(), PathBuf::from("/tmp/steplogger-root/logs"));
        assert_eq!(
            paths.socket(),
            PathBuf::from("/tmp/steplogger-root/daemon.sock")
        );
        assert_eq!(
            paths.settings_file(),
            PathBuf::from("/tmp/steplogger-root/daemon.toml")
        );
    }
}
