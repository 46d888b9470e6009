use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use reviewsync_core::{Config, FieldDelta, FieldValue, RecordId};
use reviewsync_sync::{
    FileStateStore, RemoteStore, RunState, SaveOutcome, SyncController, SyncDeps, SyncEvent,
    SystemClock, TickReport,
};

use crate::error::{io_err, DaemonError};
use crate::http_store::HttpRemoteStore;
use crate::paths::{reviewsync_root, socket_path, LOG_FORMAT_ENV};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Everything a socket client can reach.
#[derive(Clone)]
pub struct DaemonContext {
    pub home: PathBuf,
    pub controller: Arc<SyncController>,
    pub shutdown: broadcast::Sender<()>,
    pub started_at_unix: u64,
}

impl DaemonContext {
    pub fn new(home: PathBuf, controller: Arc<SyncController>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            home,
            controller,
            shutdown,
            started_at_unix: unix_seconds_now(),
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon against the remote named in `~/.reviewsync/config.yaml`.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = reviewsync_core::config::load_at(&home)?;
    let remote = HttpRemoteStore::from_config(&config.remote)?;
    run_with(home, config, Arc::new(remote)).await
}

/// Run the daemon with an explicit remote store.
pub async fn run_with(
    home: PathBuf,
    config: Config,
    remote: Arc<dyn RemoteStore>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let controller = Arc::new(SyncController::new(
        SyncDeps {
            remote,
            scope: Arc::new(config.scope.clone()),
            clock: Arc::new(SystemClock),
            store: Arc::new(FileStateStore::at_home(&home)),
        },
        config.sync.clone(),
    )
    .with_board(config.board.clone()));

    let events = controller.subscribe();
    let report = controller.bootstrap().await?;
    tracing::info!(
        fetched = report.fetched,
        loaded = report.loaded,
        checkpoint = %report.checkpoint,
        "daemon bootstrapped",
    );
    controller.start();

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let ctx = DaemonContext::new(home, controller.clone(), shutdown_tx.clone());

    let events_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = event_listener_task(events, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (events_result, socket_result, signal_result) =
        tokio::join!(events_handle, socket_handle, signal_handle);

    controller.stop().await;

    handle_join("event_listener", events_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn event_listener_task(
    mut events: broadcast::Receiver<SyncEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Events are informational here; the candidate table lives in the engine,
/// so a lagging listener loses log lines and nothing else.
fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::CandidatesAvailable(records) => {
            tracing::info!(announced = records.len(), "new records available; run `reviewsync load`");
        }
        SyncEvent::SnapshotChanged(records) => {
            tracing::debug!(records = records.len(), "working set changed");
        }
    }
}

async fn socket_server_task(
    ctx: DaemonContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&ctx.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: DaemonContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request.cmd == "stop";
        let response = handle_request(&ctx, request).await;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

/// Dispatch one decoded request.
pub async fn handle_request(ctx: &DaemonContext, request: DaemonRequest) -> DaemonResponse {
    let controller = &ctx.controller;
    let cmd = request.cmd.clone();
    match cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(ctx).await),
        "list" => DaemonResponse::ok(json!(controller.board(&request.query).await)),
        "poll" => match controller.poll_now().await {
            TickReport::Completed(summary) => DaemonResponse::ok(json!(summary)),
            TickReport::Skipped => DaemonResponse::ok(json!({ "skipped": true })),
            TickReport::Failed(message) => DaemonResponse::error(format!("poll failed: {message}")),
        },
        "pause" => {
            controller.pause();
            DaemonResponse::ok(json!({ "schedule": schedule_label(controller.schedule_state()) }))
        }
        "resume" => {
            controller.resume();
            DaemonResponse::ok(json!({ "schedule": schedule_label(controller.schedule_state()) }))
        }
        "save" => handle_save(ctx, request).await,
        "candidates" => {
            let pending = controller.candidates().await;
            DaemonResponse::ok(json!(controller.resolve(pending)))
        }
        "names" => DaemonResponse::ok(json!(controller.refresh_names().await)),
        "load" => handle_load(ctx, request.ids).await,
        "autoload" => {
            if let Some(enabled) = request.enabled {
                if let Err(err) = controller.set_autoload(enabled) {
                    return DaemonResponse::error(err.to_string());
                }
            }
            DaemonResponse::ok(json!({ "autoload": controller.autoload() }))
        }
        "stop" => {
            let _ = ctx.shutdown.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn handle_save(ctx: &DaemonContext, request: DaemonRequest) -> DaemonResponse {
    let Some(id) = request.id.filter(|id| !id.trim().is_empty()) else {
        return DaemonResponse::error("save requires a record id");
    };
    let delta = match request.fields.map(decode_delta) {
        Some(Ok(delta)) if !delta.is_empty() => delta,
        Some(Err(message)) => return DaemonResponse::error(message),
        _ => return DaemonResponse::error("save requires at least one field"),
    };

    let outcome = ctx
        .controller
        .request_save(RecordId::from(id), delta)
        .await
        .outcome()
        .await;
    match outcome {
        SaveOutcome::Applied(record) => {
            DaemonResponse::ok(json!({ "outcome": "applied", "record": record }))
        }
        SaveOutcome::Superseded => DaemonResponse::ok(json!({ "outcome": "superseded" })),
        SaveOutcome::Rejected { reason, last_good } => DaemonResponse::error_with(
            reason.to_string(),
            json!({ "outcome": "rejected", "last_good": last_good }),
        ),
    }
}

async fn handle_load(ctx: &DaemonContext, ids: Option<Vec<String>>) -> DaemonResponse {
    let ids = ids.map(|ids| ids.into_iter().map(RecordId::from).collect());
    let report = ctx.controller.request_manual_load(ids).await;
    DaemonResponse::ok(json!(report))
}

/// Wire fields → typed delta. `null` clears the field.
pub fn decode_delta(fields: Map<String, Value>) -> Result<FieldDelta, String> {
    let mut delta = FieldDelta::new();
    for (name, raw) in fields {
        if raw.is_null() {
            delta.insert(name, None);
            continue;
        }
        match FieldValue::from_json(&raw) {
            Some(value) => {
                delta.insert(name, Some(value));
            }
            None => return Err(format!("unsupported value for field '{name}': {raw}")),
        }
    }
    Ok(delta)
}

async fn build_status_payload(ctx: &DaemonContext) -> Value {
    let controller = &ctx.controller;
    let state = controller.sync_state();
    let records = controller.snapshot().await.len();
    let candidates = controller.candidates().await.len();

    json!({
        "running": true,
        "started_at_unix": ctx.started_at_unix,
        "checkpoint": state.checkpoint,
        "autoload": state.autoload,
        "schedule": schedule_label(controller.schedule_state()),
        "polling": controller.is_polling(),
        "records": records,
        "candidates": candidates,
        "saves_in_flight": controller.saves_in_flight(),
        "socket": socket_path(&ctx.home).display().to_string(),
    })
}

fn schedule_label(state: Option<RunState>) -> &'static str {
    match state {
        Some(RunState::Running) => "running",
        Some(RunState::Paused) => "paused",
        Some(RunState::Stopped) | None => "stopped",
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = reviewsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), JSON
/// lines when `REVIEWSYNC_LOG_FORMAT=json`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
