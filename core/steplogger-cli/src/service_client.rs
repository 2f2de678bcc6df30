//! Client proxy for the StepLogger daemon.
//!
//! The daemon accepts one request per socket connection, so "connected" is a
//! logical state: [`ServiceClient::connect`] proves the daemon is reachable
//! and speaks our protocol, and every later call opens a fresh stream.
//! Errors are always returned to the caller, never swallowed.

use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use steplogger_protocol::{
    FixParams, HostStatus, Method, PositionParams, Request, Response, SessionStatus,
    StartSessionParams, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

const READ_TIMEOUT_MS: u64 = 3000;
const WRITE_TIMEOUT_MS: u64 = 600;
const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not connected to the StepLogger daemon")]
    NotConnected,

    #[error("Failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out waiting for daemon response")]
    Timeout,

    #[error("Invalid daemon response: {0}")]
    Protocol(String),

    #[error("Daemon speaks protocol {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Daemon rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}

/// Answer to the connection handshake.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DaemonHealth {
    pub status: String,
    pub pid: u32,
    pub version: String,
    pub protocol_version: u32,
}

pub struct ServiceClient {
    socket: PathBuf,
    connected: bool,
}

impl ServiceClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Health handshake with bounded retries.
    pub fn connect(&mut self) -> Result<DaemonHealth, ClientError> {
        let mut attempt = 1;
        loop {
            match self.handshake() {
                Ok(health) => {
                    tracing::debug!(
                        pid = health.pid,
                        version = %health.version,
                        "Connected to daemon"
                    );
                    self.connected = true;
                    return Ok(health);
                }
                Err(err @ ClientError::VersionMismatch { .. }) => return Err(err),
                Err(err) if attempt >= CONNECT_ATTEMPTS => {
                    tracing::warn!(error = %err, attempts = attempt, "Daemon handshake failed");
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!(error = %err, attempt, "Daemon handshake failed; retrying");
                    attempt += 1;
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                }
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            tracing::debug!(path = %self.socket.display(), "Disconnected from daemon");
        }
    }

    /// Returns the session the daemon created. A daemon without a usable
    /// waypoint script answers with a `no_waypoints` rejection.
    pub fn start_logging_session(&self, uid: &str) -> Result<SessionStatus, ClientError> {
        let params = StartSessionParams {
            uid: uid.to_string(),
        };
        let data = self.call(Method::StartNewSession, Some(to_params(&params)?))?;
        serde_json::from_value(data)
            .map_err(|err| ClientError::Protocol(format!("session payload: {}", err)))
    }

    pub fn press_waypoint(&self) -> Result<(), ClientError> {
        self.call(Method::PressWaypoint, None).map(drop)
    }

    pub fn log_position(&self, timestamp: i64, x: f64, y: f64, z: f64) -> Result<(), ClientError> {
        let params = PositionParams { timestamp, x, y, z };
        self.call(Method::LogPosition, Some(to_params(&params)?))
            .map(drop)
    }

    pub fn report_fix(&self, longitude: f64, latitude: f64) -> Result<(), ClientError> {
        let params = FixParams {
            longitude,
            latitude,
        };
        self.call(Method::ReportFix, Some(to_params(&params)?))
            .map(drop)
    }

    pub fn status(&self) -> Result<HostStatus, ClientError> {
        let data = self.call(Method::GetStatus, None)?;
        serde_json::from_value(data)
            .map_err(|err| ClientError::Protocol(format!("status payload: {}", err)))
    }

    /// Stops the daemon. The client is disconnected afterwards.
    pub fn shutdown(&mut self) -> Result<(), ClientError> {
        let result = self.call(Method::Shutdown, None).map(drop);
        self.disconnect();
        result
    }

    fn handshake(&self) -> Result<DaemonHealth, ClientError> {
        let data = self.round_trip(Method::GetHealth, None)?;
        let health: DaemonHealth = serde_json::from_value(data)
            .map_err(|err| ClientError::Protocol(format!("health payload: {}", err)))?;
        if health.protocol_version != PROTOCOL_VERSION {
            return Err(ClientError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: health.protocol_version,
            });
        }
        if health.status != "ok" {
            return Err(ClientError::Protocol(format!(
                "daemon reported status {}",
                health.status
            )));
        }
        Ok(health)
    }

    fn call(&self, method: Method, params: Option<Value>) -> Result<Value, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.round_trip(method, params)
    }

    fn round_trip(&self, method: Method, params: Option<Value>) -> Result<Value, ClientError> {
        let request = Request::new(method, Some(make_request_id()), params);
        let response = send_request(&self.socket, &request)?;
        if response.ok {
            return Ok(response.data.unwrap_or(Value::Null));
        }
        match response.error {
            Some(error) => Err(ClientError::Rejected {
                code: error.code,
                message: error.message,
            }),
            None => Err(ClientError::Protocol(
                "error response without details".to_string(),
            )),
        }
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn to_params<T: serde::Serialize>(params: &T) -> Result<Value, ClientError> {
    serde_json::to_value(params)
        .map_err(|err| ClientError::Protocol(format!("Failed to serialize params: {}", err)))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "cli-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}

fn send_request(socket: &Path, request: &Request) -> Result<Response, ClientError> {
    let mut stream = UnixStream::connect(socket).map_err(|source| ClientError::Connect {
        path: socket.to_path_buf(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| ClientError::Protocol(format!("Failed to write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|source| ClientError::Io {
            context: "Failed to send request",
            source,
        })?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::Protocol(
                        "response exceeded maximum size".to_string(),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ClientError::Timeout);
            }
            Err(source) => {
                return Err(ClientError::Io {
                    context: "Failed to read response",
                    source,
                })
            }
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Protocol("daemon response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::Protocol(format!("response was not valid JSON: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use std::thread::{self, JoinHandle};

    /// Answers one connection per canned response and hands back what it saw.
    fn fake_daemon(socket: &Path, responses: Vec<Response>) -> JoinHandle<Vec<Request>> {
        let listener = UnixListener::bind(socket).expect("bind fake daemon");
        thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut line = String::new();
                reader.read_line(&mut line).expect("read request");
                seen.push(serde_json::from_str(&line).expect("request json"));

                let mut payload = serde_json::to_vec(&response).expect("response json");
                payload.push(b'\n');
                stream.write_all(&payload).expect("write response");
            }
            seen
        })
    }

    fn health(protocol_version: u32) -> Response {
        Response::ok(
            Some("health".to_string()),
            serde_json::json!({
                "status": "ok",
                "pid": 4242,
                "version": "0.1.0",
                "protocol_version": protocol_version,
            }),
        )
    }

    #[test]
    fn calls_fail_when_not_connected() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let mut client = ServiceClient::new(temp_dir.path().join("daemon.sock"));

        assert!(matches!(
            client.start_logging_session("walker"),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.press_waypoint(), Err(ClientError::NotConnected)));
        assert!(matches!(client.status(), Err(ClientError::NotConnected)));
        assert!(matches!(client.shutdown(), Err(ClientError::NotConnected)));
    }

    #[test]
    fn connect_fails_without_daemon() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let mut client = ServiceClient::new(temp_dir.path().join("daemon.sock"));

        let err = client.connect().expect_err("nothing is listening");
        assert!(matches!(err, ClientError::Connect { .. }));
        assert!(!client.is_connected());
    }

    #[test]
    fn connect_performs_health_handshake() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let server = fake_daemon(&socket, vec![health(PROTOCOL_VERSION)]);

        let mut client = ServiceClient::new(&socket);
        let info = client.connect().expect("connect");
        assert_eq!(info.pid, 4242);
        assert!(client.is_connected());

        let seen = server.join().expect("server thread");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::GetHealth);
        assert_eq!(seen[0].protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn connect_rejects_protocol_mismatch() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let server = fake_daemon(&socket, vec![health(PROTOCOL_VERSION + 1)]);

        let mut client = ServiceClient::new(&socket);
        let err = client.connect().expect_err("mismatched protocol");
        assert!(matches!(err, ClientError::VersionMismatch { found, .. } if found == PROTOCOL_VERSION + 1));
        assert!(!client.is_connected());
        server.join().expect("server thread");
    }

    #[test]
    fn disconnect_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let server = fake_daemon(&socket, vec![health(PROTOCOL_VERSION)]);

        let mut client = ServiceClient::new(&socket);
        client.connect().expect("connect");
        client.disconnect();
        client.disconnect();

        assert!(!client.is_connected());
        assert!(matches!(client.press_waypoint(), Err(ClientError::NotConnected)));
        server.join().expect("server thread");
    }

    #[test]
    fn daemon_rejection_is_surfaced() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let server = fake_daemon(
            &socket,
            vec![
                health(PROTOCOL_VERSION),
                Response::error(None, "invalid_uid", "uid must not contain path separators"),
            ],
        );

        let mut client = ServiceClient::new(&socket);
        client.connect().expect("connect");
        let err = client
            .start_logging_session("a/b")
            .expect_err("rejected uid");
        match err {
            ClientError::Rejected { code, message } => {
                assert_eq!(code, "invalid_uid");
                assert!(message.contains("path separators"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let seen = server.join().expect("server thread");
        assert_eq!(seen[1].method, Method::StartNewSession);
        assert_eq!(
            seen[1].params.as_ref().and_then(|p| p.get("uid")).and_then(Value::as_str),
            Some("a/b")
        );
    }

    #[test]
    fn position_nan_travels_as_null() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let server = fake_daemon(
            &socket,
            vec![health(PROTOCOL_VERSION), Response::accepted(None)],
        );

        let mut client = ServiceClient::new(&socket);
        client.connect().expect("connect");
        client
            .log_position(1_700_000_000_000, 1.5, f64::NAN, 3.0)
            .expect("log position");

        let seen = server.join().expect("server thread");
        let params = seen[1].params.clone().expect("params");
        assert_eq!(seen[1].method, Method::LogPosition);
        assert_eq!(params["timestamp"], 1_700_000_000_000i64);
        assert_eq!(params["x"], 1.5);
        assert!(params["y"].is_null());
        assert_eq!(params["z"], 3.0);
    }

    #[test]
    fn status_decodes_snapshot() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let snapshot = HostStatus {
            active: None,
            sessions_started: 2,
            sessions_completed: 1,
        };
        let server = fake_daemon(
            &socket,
            vec![
                health(PROTOCOL_VERSION),
                Response::ok(None, serde_json::to_value(&snapshot).expect("status json")),
            ],
        );

        let mut client = ServiceClient::new(&socket);
        client.connect().expect("connect");
        assert_eq!(client.status().expect("status"), snapshot);
        server.join().expect("server thread");
    }

    #[test]
    fn start_session_returns_created_session() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let created = SessionStatus {
            session_id: 3,
            directory: "/walks/logs/20240309T070501_walker".to_string(),
            cursor: 0,
            length: 3,
            waypoint: Some("Start".to_string()),
            button_enabled: true,
            positions_logged: 0,
            update_rate_ms: 0,
            info: "Estimations: 0 @ 0 ms".to_string(),
        };
        let server = fake_daemon(
            &socket,
            vec![
                health(PROTOCOL_VERSION),
                Response::ok(None, serde_json::to_value(&created).expect("session json")),
            ],
        );

        let mut client = ServiceClient::new(&socket);
        client.connect().expect("connect");
        assert_eq!(client.start_logging_session("walker").expect("start"), created);
        server.join().expect("server thread");
    }

    #[test]
    fn start_without_waypoints_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("daemon.sock");
        let server = fake_daemon(
            &socket,
            vec![
                health(PROTOCOL_VERSION),
                Response::error(None, "no_waypoints", "No waypoints available"),
            ],
        );

        let mut client = ServiceClient::new(&socket);
        client.connect().expect("connect");
        let err = client.start_logging_session("").expect_err("no script");
        assert!(matches!(err, ClientError::Rejected { ref code, .. } if code == "no_waypoints"));
        server.join().expect("server thread");
    }
}
