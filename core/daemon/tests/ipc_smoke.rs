use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use steplogger_protocol::{HostStatus, Method, Request, Response, PROTOCOL_VERSION};
use tempfile::TempDir;

const SCRIPT: &str = "Start:a:b:c,Mid:d:e:f,End:g:h:i";

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn prepare_root(root: &Path) {
    std::fs::write(root.join("config.ini"), format!("counter={}\n", SCRIPT))
        .expect("write config.ini");
    std::fs::write(
        root.join("daemon.toml"),
        "[session]\ncooldown_ms = 100\n\n[fix]\ntimeout_ms = 500\nmax_age_ms = 10000\n",
    )
    .expect("write daemon.toml");
}

fn spawn_daemon(home: &Path, root: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_steplogger-daemon"))
        .env("HOME", home)
        .env("STEPLOGGER_HOME", root)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn steplogger-daemon")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn call(socket: &Path, method: Method, params: Option<Value>) -> Response {
    send_request(
        socket,
        Request::new(method, Some(format!("{:?}", method)), params),
    )
}

fn status(socket: &Path) -> HostStatus {
    let response = call(socket, Method::GetStatus, None);
    assert!(response.ok, "status response was not ok");
    serde_json::from_value(response.data.expect("status data")).expect("status payload")
}

fn wait_for_status<F>(socket: &Path, what: &str, mut predicate: F) -> HostStatus
where
    F: FnMut(&HostStatus) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = status(socket);
        if predicate(&current) {
            return current;
        }
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {}: {:?}", what, current);
        }
        sleep(Duration::from_millis(25));
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn daemon_session_walk_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let root = home.path().join("steplogger");
    std::fs::create_dir_all(&root).expect("create root");
    prepare_root(&root);

    let socket = root.join("daemon.sock");
    let child = spawn_daemon(home.path(), &root);
    let _guard = DaemonGuard { child };
    wait_for_socket(&socket, Duration::from_secs(2));

    let health = call(&socket, Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    let data = health.data.expect("health data");
    assert_eq!(data["status"], "ok");
    assert_eq!(data["protocol_version"], PROTOCOL_VERSION);

    assert_eq!(status(&socket).active, None);

    let started = call(
        &socket,
        Method::StartNewSession,
        Some(json!({ "uid": "walk" })),
    );
    assert!(started.ok, "start response was not ok");
    let current = wait_for_status(&socket, "active session", |s| s.active.is_some());
    let session = current.active.expect("active session");
    assert_eq!(session.cursor, 0);
    assert_eq!(session.length, 3);
    assert_eq!(session.waypoint.as_deref(), Some("Start"));
    assert!(session.directory.ends_with("_walk"));
    let session_dir = PathBuf::from(&session.directory);
    assert!(session_dir.starts_with(root.join("logs")));

    let fix = call(
        &socket,
        Method::ReportFix,
        Some(json!({ "longitude": 10.0, "latitude": 20.0 })),
    );
    assert!(fix.ok, "fix response was not ok");

    let pressed = call(&socket, Method::PressWaypoint, None);
    assert!(pressed.ok, "press response was not ok");
    let current = wait_for_status(&socket, "first waypoint", |s| {
        s.active.as_ref().map(|a| a.cursor) == Some(1)
    });
    assert_eq!(
        current.active.and_then(|a| a.waypoint).as_deref(),
        Some("Mid")
    );

    let waypoints = read_lines(&session_dir.join("buttonsPressed.log"));
    assert_eq!(waypoints.len(), 1);
    assert!(
        waypoints[0].ends_with(" : Start : a : b : c : 10.0 : 20.0"),
        "unexpected waypoint line: {}",
        waypoints[0]
    );

    let position = call(
        &socket,
        Method::LogPosition,
        Some(json!({ "timestamp": 1_700_000_000_000i64, "x": 1.5, "y": null, "z": 3.0 })),
    );
    assert!(position.ok, "position response was not ok");
    wait_for_status(&socket, "position logged", |s| {
        s.active.as_ref().map(|a| a.positions_logged) == Some(1)
    });
    let positions = read_lines(&session_dir.join("positions.log"));
    assert_eq!(positions.len(), 1);
    assert!(
        positions[0].ends_with(" 1.5 NaN 3.0"),
        "unexpected position line: {}",
        positions[0]
    );

    let shutdown = call(&socket, Method::Shutdown, None);
    assert!(shutdown.ok, "shutdown response was not ok");

    let deadline = Instant::now() + Duration::from_secs(2);
    while socket.exists() && Instant::now() < deadline {
        sleep(Duration::from_millis(25));
    }
    assert!(!socket.exists(), "socket should be removed on shutdown");
}

#[test]
fn daemon_rejects_bad_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let root = home.path().join("steplogger");
    std::fs::create_dir_all(&root).expect("create root");
    prepare_root(&root);

    let socket = root.join("daemon.sock");
    let child = spawn_daemon(home.path(), &root);
    let _guard = DaemonGuard { child };
    wait_for_socket(&socket, Duration::from_secs(2));

    let mut mismatched = Request::new(Method::GetHealth, None, None);
    mismatched.protocol_version = PROTOCOL_VERSION + 1;
    let response = send_request(&socket, mismatched);
    assert!(!response.ok);
    assert_eq!(
        response.error.map(|e| e.code).as_deref(),
        Some("protocol_mismatch")
    );

    let response = call(&socket, Method::LogPosition, None);
    assert!(!response.ok);
    assert_eq!(
        response.error.map(|e| e.code).as_deref(),
        Some("invalid_params")
    );

    let response = call(
        &socket,
        Method::StartNewSession,
        Some(json!({ "uid": "../escape" })),
    );
    assert!(!response.ok);
    assert_eq!(response.error.map(|e| e.code).as_deref(), Some("invalid_uid"));
    assert_eq!(status(&socket).sessions_started, 0);

    let mut stream = UnixStream::connect(&socket).expect("connect");
    stream.write_all(b"not json\n").expect("write garbage");
    let response = read_response(&mut stream);
    assert!(!response.ok);
    assert_eq!(response.error.map(|e| e.code).as_deref(), Some("invalid_json"));
}

#[test]
fn daemon_idle_connection_returns_read_timeout_error() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let root = home.path().join("steplogger");
    std::fs::create_dir_all(&root).expect("create root");
    prepare_root(&root);

    let socket = root.join("daemon.sock");
    let child = spawn_daemon(home.path(), &root);
    let _guard = DaemonGuard { child };
    wait_for_socket(&socket, Duration::from_secs(2));

    let mut idle = UnixStream::connect(&socket).expect("failed to connect idle stream");
    let response = read_response(&mut idle);
    assert!(!response.ok, "idle request should return an error");
    assert_eq!(
        response.error.as_ref().map(|err| err.code.as_str()),
        Some("read_timeout")
    );
}

#[test]
fn daemon_start_follows_config_edits() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let root = home.path().join("steplogger");
    std::fs::create_dir_all(&root).expect("create root");
    prepare_root(&root);
    std::fs::remove_file(root.join("config.ini")).expect("remove config.ini");

    let socket = root.join("daemon.sock");
    let child = spawn_daemon(home.path(), &root);
    let _guard = DaemonGuard { child };
    wait_for_socket(&socket, Duration::from_secs(2));

    let refused = call(&socket, Method::StartNewSession, Some(json!({ "uid": "" })));
    assert!(!refused.ok, "start without a script must fail");
    assert_eq!(refused.error.map(|e| e.code).as_deref(), Some("no_waypoints"));
    let current = status(&socket);
    assert_eq!(current.active, None);
    assert_eq!(current.sessions_started, 0);

    std::fs::write(root.join("config.ini"), "counter=Start:a:b:c\n").expect("write config.ini");
    let started = call(&socket, Method::StartNewSession, Some(json!({ "uid": "" })));
    assert!(started.ok, "start after the config edit should succeed");
    let data = started.data.expect("session data");
    assert_eq!(data["length"], 1);
    assert_eq!(data["waypoint"], "Start");
    assert_eq!(status(&socket).sessions_started, 1);
}
