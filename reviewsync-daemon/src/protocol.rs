use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use reviewsync_sync::BoardQuery;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// Record identity for `save`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Field delta for `save`; `null` clears a field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
    /// Candidate identities for `load`; absent means all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    /// New value for `autoload`; absent only queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// `search` / `tech` / `branch` filters for `list`.
    #[serde(flatten)]
    pub query: BoardQuery,
}

impl DaemonRequest {
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Failure that still carries a payload (e.g. the revert values of a
    /// rejected save).
    pub fn error_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            ok: false,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// `status`, retried briefly while a freshly spawned daemon binds its socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    simple(home, "stop").map(|_| ())
}

pub fn request_list(home: &Path, query: &BoardQuery) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            query: query.clone(),
            ..DaemonRequest::command("list")
        },
    )?;
    response_into_data(response)
}

/// Re-list the linked tables behind link fields.
pub fn request_refresh_names(home: &Path) -> Result<Value, DaemonError> {
    simple(home, "names")
}

pub fn request_poll(home: &Path) -> Result<Value, DaemonError> {
    simple(home, "poll")
}

pub fn request_pause(home: &Path) -> Result<Value, DaemonError> {
    simple(home, "pause")
}

pub fn request_resume(home: &Path) -> Result<Value, DaemonError> {
    simple(home, "resume")
}

pub fn request_candidates(home: &Path) -> Result<Value, DaemonError> {
    simple(home, "candidates")
}

/// Returns the raw response: a rejected save is `ok: false` but still
/// carries the last confirmed record in `data`.
pub fn request_save(
    home: &Path,
    id: &str,
    fields: Map<String, Value>,
) -> Result<DaemonResponse, DaemonError> {
    send_request(
        home,
        &DaemonRequest {
            id: Some(id.to_string()),
            fields: Some(fields),
            ..DaemonRequest::command("save")
        },
    )
}

pub fn request_load(home: &Path, ids: Option<Vec<String>>) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            ids,
            ..DaemonRequest::command("load")
        },
    )?;
    response_into_data(response)
}

pub fn request_autoload(home: &Path, enabled: Option<bool>) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            enabled,
            ..DaemonRequest::command("autoload")
        },
    )?;
    response_into_data(response)
}

fn simple(home: &Path, cmd: &str) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::command(cmd))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
