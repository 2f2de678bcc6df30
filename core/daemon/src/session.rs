//! The active logging session: waypoint cursor, overlay state and log sink.
//!
//! ## State Machine
//!
//! ```text
//! Active(0) ──press──▶ [button disabled, fix requested]
//!     ▲                        │
//!     │ append failed          │ fix resolved (or timed out → NaN)
//!     └──── re-enable ◀────────┤
//!                              │ append ok
//!                              ▼
//!                 cursor += 1, cool-down ──▶ Active(cursor)  (cursor < len)
//!                                         └─▶ Complete       (cursor == len)
//! ```
//!
//! Position reports are independent of the button: each one is appended to
//! the position log and counted.
//!
//! Everything here runs on the host's coordination thread. The session never
//! waits on a fix itself; see [`crate::host`].

use std::path::Path;

use steplogger_core::WaypointScript;
use steplogger_protocol::SessionStatus;

use crate::fix::{Fix, FixRequest};
use crate::rate::RateStats;
use crate::sink::{PositionRecord, SessionLog, WaypointEventRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active { cursor: usize },
    Complete,
}

/// Result of resolving a button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PressOutcome {
    /// The waypoint log append failed; cursor unchanged, button re-enabled.
    Retry,
    /// Cursor advanced; the button stays disabled until the cool-down ends.
    Advanced { cursor: usize },
    /// The last waypoint was recorded.
    Complete,
    /// No press was in flight (stale or duplicate resolution).
    Ignored,
}

/// What the overlay currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub label: String,
    pub button_enabled: bool,
    pub info: String,
}

pub struct LoggingSession {
    id: SessionId,
    script: WaypointScript,
    cursor: usize,
    log: SessionLog,
    stats: RateStats,
    fix_request: FixRequest,
    press_in_flight: bool,
    overlay: Option<Overlay>,
}

impl LoggingSession {
    pub fn new(
        id: SessionId,
        dir: &Path,
        script: WaypointScript,
        fix_request: FixRequest,
        now_ms: i64,
    ) -> Self {
        let stats = RateStats::new(now_ms);
        let label = script
            .get(0)
            .map(|waypoint| waypoint.name().to_string())
            .unwrap_or_default();
        let overlay = Overlay {
            label,
            button_enabled: true,
            info: stats.label(now_ms),
        };

        tracing::info!(
            session_id = id.0,
            dir = %dir.display(),
            waypoints = script.len(),
            "New logging session"
        );

        Self {
            id,
            script,
            cursor: 0,
            log: SessionLog::new(dir),
            stats,
            fix_request,
            press_in_flight: false,
            overlay: Some(overlay),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        self.log.dir()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn state(&self) -> SessionState {
        if self.cursor >= self.script.len() {
            SessionState::Complete
        } else {
            SessionState::Active {
                cursor: self.cursor,
            }
        }
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn positions_logged(&self) -> u64 {
        self.stats.total()
    }

    /// Starts a button transition. Returns the fix to request, or `None` when
    /// the press must be ignored (button disabled, press in flight, complete).
    pub fn begin_press(&mut self) -> Option<FixRequest> {
        if self.press_in_flight || self.state() == SessionState::Complete {
            return None;
        }
        let overlay = self.overlay.as_mut()?;
        if !overlay.button_enabled {
            tracing::debug!(session_id = self.id.0, "Press ignored; button disabled");
            return None;
        }

        overlay.button_enabled = false;
        self.press_in_flight = true;
        Some(self.fix_request)
    }

    /// Completes the in-flight press with the resolved fix.
    pub fn complete_press(&mut self, fix: Fix, now_ms: i64) -> PressOutcome {
        if !self.press_in_flight {
            return PressOutcome::Ignored;
        }
        self.press_in_flight = false;

        let Some(waypoint) = self.script.get(self.cursor) else {
            return PressOutcome::Ignored;
        };
        tracing::debug!(
            session_id = self.id.0,
            longitude = fix.longitude,
            latitude = fix.latitude,
            "Location for waypoint"
        );

        let record = WaypointEventRecord::new(now_ms, waypoint, fix.longitude, fix.latitude);
        if let Err(err) = self.log.append_waypoint_event(&record) {
            tracing::error!(
                session_id = self.id.0,
                cursor = self.cursor,
                error = %err,
                "Waypoint not recorded; press again to retry"
            );
            self.set_button_enabled(true);
            return PressOutcome::Retry;
        }

        self.cursor += 1;
        tracing::info!(
            session_id = self.id.0,
            cursor = self.cursor,
            waypoint = %waypoint.name(),
            "Waypoint recorded"
        );

        match self.script.get(self.cursor) {
            Some(next) => {
                let name = next.name().to_string();
                if let Some(overlay) = self.overlay.as_mut() {
                    overlay.label = name;
                }
                PressOutcome::Advanced {
                    cursor: self.cursor,
                }
            }
            None => {
                tracing::info!(
                    session_id = self.id.0,
                    dir = %self.dir().display(),
                    "Logging complete"
                );
                self.destroy();
                PressOutcome::Complete
            }
        }
    }

    /// End of the cool-down window.
    pub fn reenable_button(&mut self) {
        if !self.press_in_flight {
            self.set_button_enabled(true);
        }
    }

    /// Appends a position record. Failures are logged and the report dropped.
    pub fn log_position(&mut self, record: &PositionRecord, now_ms: i64) -> bool {
        if let Err(err) = self.log.append_position_record(record) {
            tracing::warn!(session_id = self.id.0, error = %err, "Position report dropped");
            return false;
        }
        self.stats.record(now_ms);
        let info = self.stats.label(now_ms);
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.info = info;
        }
        true
    }

    /// Releases the overlay. Idempotent.
    pub fn destroy(&mut self) {
        if self.overlay.take().is_some() {
            tracing::debug!(session_id = self.id.0, "Overlay released");
        }
    }

    pub fn status(&self, now_ms: i64) -> SessionStatus {
        let overlay = self.overlay();
        SessionStatus {
            session_id: self.id.0,
            directory: self.dir().display().to_string(),
            cursor: self.cursor,
            length: self.len(),
            waypoint: overlay.map(|o| o.label.clone()),
            button_enabled: overlay.map(|o| o.button_enabled).unwrap_or(false),
            positions_logged: self.positions_logged(),
            update_rate_ms: self.stats.update_rate_ms(now_ms),
            info: overlay.map(|o| o.info.clone()).unwrap_or_default(),
        }
    }

    fn set_button_enabled(&mut self, enabled: bool) {
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.button_enabled = enabled;
        }
    }
}

impl Drop for LoggingSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
