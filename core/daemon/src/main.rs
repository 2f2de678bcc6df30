//! StepLogger daemon entrypoint.
//!
//! A small, single-writer service that owns the active logging session.
//! It listens on a Unix socket, validates each request strictly, and hands
//! accepted commands to the coordination loop in [`host`].

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use steplogger_core::{AppPaths, ConfigStore, WaypointScript};
use steplogger_protocol::{
    parse_fix, parse_position, parse_start_session, ErrorInfo, Method, Request, Response,
    ERROR_HOST_UNAVAILABLE, ERROR_NO_WAYPOINTS, ERROR_PROTOCOL_MISMATCH, ERROR_SESSION_FAILED,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod fix;
mod host;
mod rate;
mod session;
mod settings;
mod sink;

use fix::{Fix, ReportedFixProvider};
use host::{HostError, HostHandle, ServiceHost};

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const HOST_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

struct DaemonContext {
    host: HostHandle,
    fixes: Arc<ReportedFixProvider>,
    socket_path: PathBuf,
}

fn main() {
    init_logging();

    let paths = match AppPaths::resolve() {
        Ok(paths) => paths,
        Err(err) => {
            error!(error = %err, "Failed to resolve application paths");
            std::process::exit(1);
        }
    };

    let settings = match settings::load_settings(&paths.settings_file()) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon settings; using defaults");
            settings::DaemonSettings::default()
        }
    };
    let host_settings = settings.host_settings(&paths);

    let mut config = ConfigStore::new(settings.config_file(&paths));
    match config.load() {
        Ok(()) => match WaypointScript::from_config(&config) {
            Ok(script) => info!(waypoints = script.len(), "Waypoint script loaded"),
            Err(err) => warn!(error = %err, "Waypoint script unusable; sessions cannot start"),
        },
        Err(err) => warn!(error = %err, "Configuration not loaded; sessions cannot start"),
    }

    if let Err(err) = fs::create_dir_all(&host_settings.log_root) {
        warn!(
            error = %err,
            path = %host_settings.log_root.display(),
            "Failed to create log root"
        );
    }

    let socket_path = paths.socket();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let fixes = Arc::new(ReportedFixProvider::new());
    info!(
        log_root = %host_settings.log_root.display(),
        cooldown_ms = host_settings.cooldown.as_millis() as u64,
        fix_timeout_ms = host_settings.fix_request.timeout.as_millis() as u64,
        "Session settings loaded"
    );
    let (host, _coordinator) = match ServiceHost::new(config, host_settings, fixes.clone()).spawn()
    {
        Ok(spawned) => spawned,
        Err(err) => {
            error!(error = %err, "Failed to start coordination loop");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "StepLogger daemon started");

    let context = Arc::new(DaemonContext {
        host,
        fixes,
        socket_path,
    });

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let context = Arc::clone(&context);
                thread::spawn(move || handle_connection(stream, &context));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("STEPLOGGER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, context: &DaemonContext) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let method = request.method;
    let response = handle_request(request, context);
    let shutting_down = method == Method::Shutdown && response.ok;
    let _ = write_response(&mut stream, response);

    if shutting_down {
        let _ = remove_existing_socket(&context.socket_path);
        info!("StepLogger daemon stopped");
        std::process::exit(0);
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
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
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, context: &DaemonContext) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            ERROR_PROTOCOL_MISMATCH,
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            }),
        ),
        Method::GetStatus => match context.host.status(HOST_REPLY_TIMEOUT) {
            Ok(status) => data_response(request.id, &status),
            Err(err) => host_error(request.id, err),
        },
        Method::StartNewSession => {
            let params = match parse_start_session(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            info!(uid = %params.uid, "Start session requested");
            match context.host.start_session(params.uid, HOST_REPLY_TIMEOUT) {
                Ok(started) => data_response(request.id, &started),
                Err(err) => host_error(request.id, err),
            }
        }
        Method::LogPosition => {
            let params = match parse_position(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            accepted(request.id, context.host.report_position(params))
        }
        Method::PressWaypoint => accepted(request.id, context.host.press_waypoint()),
        Method::ReportFix => {
            let params = match parse_fix(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            context
                .fixes
                .publish(Fix::new(params.longitude, params.latitude));
            Response::accepted(request.id)
        }
        Method::Shutdown => {
            info!("Shutdown requested");
            match context.host.shutdown(HOST_REPLY_TIMEOUT) {
                Ok(()) => Response::accepted(request.id),
                Err(err) => host_error(request.id, err),
            }
        }
    }
}

fn accepted(id: Option<String>, queued: Result<(), HostError>) -> Response {
    match queued {
        Ok(()) => Response::accepted(id),
        Err(err) => host_error(id, err),
    }
}

fn host_error(id: Option<String>, err: HostError) -> Response {
    let code = match &err {
        HostError::NoWaypoints(_) => ERROR_NO_WAYPOINTS,
        HostError::CreateDir { .. } => ERROR_SESSION_FAILED,
        HostError::Unavailable | HostError::Timeout(_) => {
            error!(error = %err, "Coordination loop unavailable");
            ERROR_HOST_UNAVAILABLE
        }
    };
    Response::error(id, code, err.to_string())
}

fn data_response<T: serde::Serialize>(id: Option<String>, data: &T) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
