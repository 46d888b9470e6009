use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use reviewsync_core::{
    BoardConfig, Config, FieldValue, Fields, Record, RemoteConfig, ScopeRules, SyncSettings,
};
use reviewsync_daemon::paths::socket_path;
use reviewsync_daemon::{
    request_autoload, request_list, request_save, request_status, request_stop, run_with,
    DaemonError,
};
use reviewsync_sync::testing::MemoryRemote;
use reviewsync_sync::BoardQuery;

fn backcharge(id: &str, amount: f64) -> Record {
    let mut fields = Fields::new();
    fields.insert("Type of Backcharge".into(), "Builder Issued Backcharge".into());
    fields.insert("Amount".into(), FieldValue::Number(amount));
    Record::new(id, fields)
}

fn config() -> Config {
    Config {
        remote: RemoteConfig::new("appTEST", "tblTEST"),
        scope: ScopeRules::default(),
        sync: SyncSettings::default(),
        board: BoardConfig::default(),
    }
}

fn wait_for_socket(home: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !socket_path(home).exists() {
        assert!(Instant::now() < deadline, "daemon socket never appeared");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_serves_status_list_save_and_stop() {
    let home = TempDir::new().expect("home");
    let remote = Arc::new(MemoryRemote::with_records([
        backcharge("rec1", 40.0),
        backcharge("rec2", 75.0),
    ]));

    let daemon = tokio::spawn(run_with(home.path().to_path_buf(), config(), remote.clone()));

    let home_path = home.path().to_path_buf();
    let (status, listed, saved, autoload) = tokio::task::spawn_blocking(move || {
        wait_for_socket(&home_path);
        let status = request_status(&home_path)?;
        let listed = request_list(&home_path, &BoardQuery::default())?;

        let mut fields = Map::new();
        fields.insert("Amount".into(), json!(55));
        let saved = request_save(&home_path, "rec1", fields)?;

        let autoload = request_autoload(&home_path, Some(false))?;
        request_stop(&home_path)?;
        Ok::<_, DaemonError>((status, listed, saved, autoload))
    })
    .await
    .expect("client thread")
    .expect("daemon requests");

    daemon
        .await
        .expect("daemon task")
        .expect("daemon exits cleanly");

    assert_eq!(status["running"], json!(true));
    assert_eq!(status["records"], json!(2));
    assert_eq!(status["schedule"], json!("running"));

    let ids: Vec<&str> = listed
        .as_array()
        .expect("list array")
        .iter()
        .filter_map(|r| r["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["rec1", "rec2"]);

    assert!(saved.ok, "{saved:?}");
    let data: Value = saved.data.expect("save data");
    assert_eq!(data["record"]["fields"]["Amount"], json!(55.0));
    assert_eq!(
        remote.get(&"rec1".into()).and_then(|r| r.field("Amount").cloned()),
        Some(FieldValue::Number(55.0))
    );

    assert_eq!(autoload, json!({"autoload": false}));
    let state = std::fs::read_to_string(home.path().join(".reviewsync").join("state.json"))
        .expect("state file written");
    assert!(state.contains("\"autoload\": false"));

    assert!(
        !socket_path(home.path()).exists(),
        "socket removed on shutdown"
    );
}

#[test]
fn requests_fail_cleanly_without_daemon() {
    let home = TempDir::new().expect("home");
    let err = request_list(home.path(), &BoardQuery::default()).unwrap_err();
    assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
}
