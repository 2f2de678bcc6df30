//! IPC protocol types and validation for steplogger-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.
//!
//! Transport: one newline-terminated JSON request per Unix socket connection,
//! answered by one newline-terminated JSON response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_UID_CHARS: usize = 128;

pub const ERROR_PROTOCOL_MISMATCH: &str = "protocol_mismatch";
pub const ERROR_INVALID_PARAMS: &str = "invalid_params";
pub const ERROR_HOST_UNAVAILABLE: &str = "host_unavailable";
pub const ERROR_NO_WAYPOINTS: &str = "no_waypoints";
pub const ERROR_SESSION_FAILED: &str = "session_failed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    StartNewSession,
    LogPosition,
    PressWaypoint,
    ReportFix,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    /// Acknowledges a fire-and-forget command.
    pub fn accepted(id: Option<String>) -> Self {
        Self::ok(id, serde_json::json!({ "accepted": true }))
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StartSessionParams {
    #[serde(default)]
    pub uid: String,
}

impl StartSessionParams {
    /// The uid becomes part of a directory name, so it must stay a single
    /// path component.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.uid.chars().count() > MAX_UID_CHARS {
            return Err(ErrorInfo::new(
                "invalid_uid",
                format!("uid must be {} characters or fewer", MAX_UID_CHARS),
            ));
        }
        if self.uid.contains(['/', '\\']) || self.uid.contains("..") {
            return Err(ErrorInfo::new(
                "invalid_uid",
                "uid must not contain path separators or '..'",
            ));
        }
        if self.uid.chars().any(char::is_control) {
            return Err(ErrorInfo::new(
                "invalid_uid",
                "uid must not contain control characters",
            ));
        }
        Ok(())
    }
}

/// A position estimate from the positioning collaborator.
///
/// Coordinates are unvalidated. JSON has no NaN, so a missing coordinate
/// travels as `null` and is read back as NaN.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionParams {
    pub timestamp: i64,
    #[serde(with = "nullable_f64")]
    pub x: f64,
    #[serde(with = "nullable_f64")]
    pub y: f64,
    #[serde(with = "nullable_f64")]
    pub z: f64,
}

/// A location fix pushed by the positioning collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixParams {
    #[serde(with = "nullable_f64")]
    pub longitude: f64,
    #[serde(with = "nullable_f64")]
    pub latitude: f64,
}

pub fn parse_start_session(params: Option<Value>) -> Result<StartSessionParams, ErrorInfo> {
    let parsed: StartSessionParams = match params {
        Some(params) => parse_params(params, "start_new_session")?,
        None => StartSessionParams::default(),
    };
    parsed.validate()?;
    Ok(parsed)
}

pub fn parse_position(params: Option<Value>) -> Result<PositionParams, ErrorInfo> {
    let params = params.ok_or_else(|| {
        ErrorInfo::new(ERROR_INVALID_PARAMS, "timestamp, x, y, z are required")
    })?;
    parse_params(params, "log_position")
}

pub fn parse_fix(params: Option<Value>) -> Result<FixParams, ErrorInfo> {
    let params = params
        .ok_or_else(|| ErrorInfo::new(ERROR_INVALID_PARAMS, "longitude, latitude are required"))?;
    parse_params(params, "report_fix")
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value, method: &str) -> Result<T, ErrorInfo> {
    if !params.is_object() {
        return Err(ErrorInfo::new(ERROR_INVALID_PARAMS, "params must be an object"));
    }
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            ERROR_INVALID_PARAMS,
            format!("{} payload is invalid: {}", method, err),
        )
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Status snapshot (get_status)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostStatus {
    pub active: Option<SessionStatus>,
    pub sessions_started: u64,
    pub sessions_completed: u64,
}

/// What the overlay shows for the active session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub session_id: u64,
    pub directory: String,
    pub cursor: usize,
    pub length: usize,
    /// Name on the waypoint button; `None` once the script is exhausted.
    pub waypoint: Option<String>,
    pub button_enabled: bool,
    pub positions_logged: u64,
    pub update_rate_ms: u64,
    pub info: String,
}

mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
