//! # steplogger-core
//!
//! Logic shared by the StepLogger daemon and its clients.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency.
//! - **Not thread-safe**: Callers own their synchronization. The daemon keeps
//!   everything here on its coordination thread.
//! - **Errors are reported, not fatal**: A missing config file or a malformed
//!   waypoint script is returned to the caller, which decides whether to go on
//!   with an empty state.

pub mod config;
pub mod error;
pub mod paths;
pub mod script;

pub use config::{ConfigStore, SCRIPT_KEY};
pub use error::{CoreError, Result};
pub use paths::AppPaths;
pub use script::{WaypointDescriptor, WaypointScript, DESCRIPTOR_FIELDS};
