//! Service host: owns the single active logging session.
//!
//! The host lives on one coordination thread. Socket handlers and fix
//! workers never touch session state directly; they send [`HostCommand`]s
//! through a [`HostHandle`], and the loop applies them one at a time. This is
//! what keeps a button transition (fix → append → advance → cool-down) from
//! interleaving with another press or with a session start.
//!
//! Timers (the button cool-down) are deadlines checked by the loop itself,
//! so a re-enable can never race a transition.
//!
//! The loop owns no sender of its own. It stops on `Shutdown`, or once every
//! [`HostHandle`] and every in-flight fix worker has gone away.

use chrono::{DateTime, Local, Utc};
use fs_err as fs;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use steplogger_core::{ConfigStore, CoreError, WaypointScript};
use steplogger_protocol::{HostStatus, PositionParams, SessionStatus};

use crate::fix::{Fix, FixProvider, FixRequest};
use crate::session::{LoggingSession, PressOutcome, SessionId};
use crate::sink::PositionRecord;

const SESSION_DIR_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("No waypoints available: {0}")]
    NoWaypoints(#[source] CoreError),

    #[error("Failed to create session directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Coordination loop is not running")]
    Unavailable,

    #[error("Coordination loop did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub log_root: PathBuf,
    pub cooldown: Duration,
    pub fix_request: FixRequest,
}

pub enum HostCommand {
    StartSession {
        uid: String,
        reply: Sender<Result<SessionStatus, HostError>>,
    },
    ReportPosition(PositionParams),
    /// `resolver` is handed to the fix worker, which answers through it.
    PressWaypoint { resolver: Sender<HostCommand> },
    FixResolved { session: SessionId, fix: Fix },
    Status { reply: Sender<HostStatus> },
    Shutdown { reply: Sender<()> },
}

/// Cloneable sender side of the coordination loop.
#[derive(Clone)]
pub struct HostHandle {
    commands: Sender<HostCommand>,
}

impl HostHandle {
    /// Replies once the session exists, or with the reason it could not start.
    pub fn start_session(
        &self,
        uid: String,
        timeout: Duration,
    ) -> Result<SessionStatus, HostError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::StartSession { uid, reply })?;
        receive_reply(&response, timeout)?
    }

    pub fn report_position(&self, params: PositionParams) -> Result<(), HostError> {
        self.send(HostCommand::ReportPosition(params))
    }

    pub fn press_waypoint(&self) -> Result<(), HostError> {
        self.send(HostCommand::PressWaypoint {
            resolver: self.commands.clone(),
        })
    }

    pub fn status(&self, timeout: Duration) -> Result<HostStatus, HostError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::Status { reply })?;
        receive_reply(&response, timeout)
    }

    pub fn shutdown(&self, timeout: Duration) -> Result<(), HostError> {
        let (reply, response) = mpsc::channel();
        self.send(HostCommand::Shutdown { reply })?;
        receive_reply(&response, timeout)
    }

    fn send(&self, command: HostCommand) -> Result<(), HostError> {
        self.commands
            .send(command)
            .map_err(|_| HostError::Unavailable)
    }
}

fn receive_reply<T>(response: &Receiver<T>, timeout: Duration) -> Result<T, HostError> {
    response.recv_timeout(timeout).map_err(|err| match err {
        RecvTimeoutError::Timeout => HostError::Timeout(timeout),
        RecvTimeoutError::Disconnected => HostError::Unavailable,
    })
}

pub struct ServiceHost {
    config: ConfigStore,
    settings: HostSettings,
    fixes: Arc<dyn FixProvider>,
    session: Option<LoggingSession>,
    cooldown: Option<(SessionId, Instant)>,
    next_session_id: u64,
    sessions_started: u64,
    sessions_completed: u64,
}

impl ServiceHost {
    pub fn new(config: ConfigStore, settings: HostSettings, fixes: Arc<dyn FixProvider>) -> Self {
        Self {
            config,
            settings,
            fixes,
            session: None,
            cooldown: None,
            next_session_id: 1,
            sessions_started: 0,
            sessions_completed: 0,
        }
    }

    /// Moves the host onto its own coordination thread.
    pub fn spawn(self) -> std::io::Result<(HostHandle, JoinHandle<()>)> {
        let (commands, receiver) = mpsc::channel();
        let join = thread::Builder::new()
            .name("coordinator".to_string())
            .spawn(move || self.run(receiver))?;
        Ok((HostHandle { commands }, join))
    }

    fn run(mut self, commands: Receiver<HostCommand>) {
        tracing::debug!("Coordination loop started");
        loop {
            let received = match self.next_deadline() {
                Some(deadline) => {
                    match commands.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };

            self.fire_timers(Instant::now());

            if let Some(command) = received {
                if self.handle(command).is_break() {
                    return;
                }
            }
        }
        tracing::debug!("All host handles dropped; coordination loop stopping");
        self.shutdown();
    }

    fn handle(&mut self, command: HostCommand) -> ControlFlow<()> {
        match command {
            HostCommand::StartSession { uid, reply } => {
                let started = self.start_and_describe(&uid);
                if let Err(err) = &started {
                    tracing::error!(uid = %uid, error = %err, "Failed to start logging session");
                }
                let _ = reply.send(started);
            }
            HostCommand::ReportPosition(params) => self.report_position(params),
            HostCommand::PressWaypoint { resolver } => {
                if let Some((session, request)) = self.press_waypoint() {
                    self.spawn_fix_worker(session, request, resolver);
                }
            }
            HostCommand::FixResolved { session, fix } => self.resolve_fix(session, fix),
            HostCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            HostCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Replaces any active session with a new one. The configuration file is
    /// re-read first so edits made while the daemon runs are picked up.
    pub fn start_session(&mut self, uid: &str) -> Result<SessionId, HostError> {
        self.cleanup("superseded");

        if let Err(err) = self.config.load() {
            tracing::warn!(error = %err, "Configuration not reloaded; using last loaded values");
        }
        let script = WaypointScript::from_config(&self.config).map_err(HostError::NoWaypoints)?;

        let dir = self
            .settings
            .log_root
            .join(session_dir_name(Local::now(), uid));
        fs::create_dir_all(&dir).map_err(|source| HostError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        self.sessions_started += 1;
        self.session = Some(LoggingSession::new(
            id,
            &dir,
            script,
            self.settings.fix_request,
            now_ms(),
        ));
        Ok(id)
    }

    fn start_and_describe(&mut self, uid: &str) -> Result<SessionStatus, HostError> {
        self.start_session(uid)?;
        self.session
            .as_ref()
            .map(|session| session.status(now_ms()))
            .ok_or(HostError::Unavailable)
    }

    pub fn report_position(&mut self, params: PositionParams) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(timestamp = params.timestamp, "No active session; position discarded");
            return;
        };

        let now = now_ms();
        tracing::trace!(
            reported_at = params.timestamp,
            x = params.x,
            y = params.y,
            z = params.z,
            "Position report"
        );
        let record = PositionRecord {
            timestamp: now,
            x: params.x,
            y: params.y,
            z: params.z,
        };
        session.log_position(&record, now);
    }

    /// Starts a button transition; returns the fix the caller must resolve.
    pub fn press_waypoint(&mut self) -> Option<(SessionId, FixRequest)> {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("No active session; press ignored");
            return None;
        };
        session.begin_press().map(|request| (session.id(), request))
    }

    /// Finishes a button transition. Results for sessions that were
    /// superseded or completed in the meantime are dropped.
    pub fn resolve_fix(&mut self, id: SessionId, fix: Fix) {
        let Some(session) = self.session.as_mut().filter(|session| session.id() == id) else {
            tracing::debug!(session_id = id.0, "Fix for inactive session discarded");
            return;
        };

        match session.complete_press(fix, now_ms()) {
            PressOutcome::Advanced { cursor } => {
                tracing::debug!(session_id = id.0, cursor, "Button cooling down");
                self.cooldown = Some((id, Instant::now() + self.settings.cooldown));
            }
            PressOutcome::Complete => self.on_session_complete(),
            PressOutcome::Retry | PressOutcome::Ignored => {}
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.cooldown.map(|(_, deadline)| deadline)
    }

    pub fn fire_timers(&mut self, now: Instant) {
        let Some((id, deadline)) = self.cooldown else {
            return;
        };
        if deadline > now {
            return;
        }
        self.cooldown = None;
        if let Some(session) = self.session.as_mut().filter(|session| session.id() == id) {
            session.reenable_button();
        }
    }

    pub fn status(&self) -> HostStatus {
        HostStatus {
            active: self.session.as_ref().map(|session| session.status(now_ms())),
            sessions_started: self.sessions_started,
            sessions_completed: self.sessions_completed,
        }
    }

    pub fn shutdown(&mut self) {
        self.cleanup("host shutdown");
    }

    fn on_session_complete(&mut self) {
        if let Some(session) = self.session.take() {
            self.sessions_completed += 1;
            self.cooldown = None;
            tracing::info!(
                session_id = session.id().0,
                dir = %session.dir().display(),
                "Session complete; released"
            );
        }
    }

    fn cleanup(&mut self, reason: &str) {
        if let Some(mut session) = self.session.take() {
            tracing::info!(
                session_id = session.id().0,
                cursor = session.cursor(),
                reason,
                "Destroying logging session"
            );
            session.destroy();
        }
        self.cooldown = None;
    }

    fn spawn_fix_worker(
        &mut self,
        id: SessionId,
        request: FixRequest,
        resolver: Sender<HostCommand>,
    ) {
        tracing::debug!(
            session_id = id.0,
            timeout_ms = request.timeout.as_millis() as u64,
            max_age_ms = request.max_age.as_millis() as u64,
            high_accuracy = request.high_accuracy,
            "Requesting fix"
        );
        let fixes = Arc::clone(&self.fixes);
        let spawned = thread::Builder::new()
            .name("fix-request".to_string())
            .spawn(move || {
                let fix = fixes.current_fix(&request).unwrap_or_else(Fix::unavailable);
                let _ = resolver.send(HostCommand::FixResolved { session: id, fix });
            });

        if let Err(err) = spawned {
            tracing::warn!(error = %err, "Failed to spawn fix worker; logging without a fix");
            self.resolve_fix(id, Fix::unavailable());
        }
    }
}

/// `<YYYYMMDDTHHMMSS>[_<uid>]`
pub fn session_dir_name(now: DateTime<Local>, uid: &str) -> String {
    let timestamp = now.format(SESSION_DIR_FORMAT).to_string();
    if uid.is_empty() {
        timestamp
    } else {
        format!("{}_{}", timestamp, uid)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
