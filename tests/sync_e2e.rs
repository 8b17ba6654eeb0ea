//! End-to-end synchronize passes against throwaway HTTP servers standing in
//! for a node agent and the router's admin API.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use nodewatch::models::{NewNode, Node, NodeStatus};
use nodewatch::stream_router::{ReloadMethod, RouterConfig};
use nodewatch::sync::SyncConfig;
use nodewatch::{AppConfig, Application, CoreError, ErrorKind};

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Node agent answering with a fixed camera list.
async fn node_agent(cameras: serde_json::Value) -> SocketAddr {
    spawn(Router::new().route(
        "/get-list-cameras",
        get(move || {
            let cameras = cameras.clone();
            async move { Json(json!({ "cameras": cameras })) }
        }),
    ))
    .await
}

/// Node agent that never answers within the client timeout.
async fn stalled_agent() -> SocketAddr {
    spawn(Router::new().route(
        "/get-list-cameras",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({ "cameras": [] }))
        }),
    ))
    .await
}

/// Node agent whose camera list can be swapped between passes.
async fn switchable_agent(cameras: serde_json::Value) -> (SocketAddr, Arc<Mutex<serde_json::Value>>) {
    let answer = Arc::new(Mutex::new(cameras));
    let shared = answer.clone();
    let addr = spawn(Router::new().route(
        "/get-list-cameras",
        get(move || {
            let cameras = shared.lock().unwrap().clone();
            async move { Json(json!({ "cameras": cameras })) }
        }),
    ))
    .await;
    (addr, answer)
}

/// Node agent answering every request with a fixed status and body.
async fn broken_agent(status: StatusCode, body: &'static str) -> SocketAddr {
    spawn(Router::new().route(
        "/get-list-cameras",
        get(move || async move {
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }),
    ))
    .await
}

async fn router_admin() -> SocketAddr {
    spawn(
        Router::new()
            .route("/v3/config/paths/reload", post(|| async { "" }))
            .route("/v3/config/get", get(|| async { Json(json!({})) })),
    )
    .await
}

struct Harness {
    app: Application,
    node: Node,
    table: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn harness(agent: SocketAddr, admin: Option<SocketAddr>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("mediamtx.yml");
    tokio::fs::write(&table, "logLevel: info\npaths:\n  lobby:\n    source: publisher\n")
        .await
        .unwrap();

    let config = AppConfig {
        router: RouterConfig {
            config_path: table.clone(),
            api_url: admin
                .map(|a| format!("http://{}", a))
                .unwrap_or_else(|| "http://127.0.0.1:1".into()),
            reload_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(500),
            restart_command: vec!["false".into()],
            restart_settle: Duration::ZERO,
            ..RouterConfig::default()
        },
        sync: SyncConfig {
            agent_port: agent.port(),
            node_timeout: Duration::from_millis(300),
            ..SyncConfig::default()
        },
        ..AppConfig::default()
    };
    let app = Application::in_memory(config);
    let node = app
        .registry
        .create_node(NewNode {
            name: "N1".into(),
            external_id: "7".into(),
            direct_ip: Some("127.0.0.1".into()),
            hostname: None,
        })
        .await
        .unwrap();

    Harness {
        app,
        node,
        table,
        _dir: dir,
    }
}

#[tokio::test]
async fn stalled_node_goes_offline_and_nothing_changes() {
    let h = harness(stalled_agent().await, None).await;
    h.app.liveness.record_heartbeat("7").await.unwrap();
    let before = tokio::fs::read_to_string(&h.table).await.unwrap();

    let err = h.app.synchronizer.synchronize(h.node.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert!(matches!(err, CoreError::Connectivity { ref address, .. } if address == "127.0.0.1"));

    let node = h.app.registry.node(h.node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Offline);
    assert!(h.app.registry.cameras_for_node(node.id).await.unwrap().is_empty());
    assert_eq!(tokio::fs::read_to_string(&h.table).await.unwrap(), before);
}

#[tokio::test]
async fn unreachable_router_requires_manual_restart() {
    let agent = node_agent(json!([{ "id": "cam_1", "name": "Gate" }, { "id": "cam_2" }])).await;
    let h = harness(agent, None).await;

    let report = h.app.synchronizer.synchronize(h.node.id).await.unwrap();
    assert_eq!(report.cameras_added, 2);
    assert_eq!(report.node.status, NodeStatus::Online);
    let reload = report.router.reload.as_ref().unwrap();
    assert_eq!(reload.method, ReloadMethod::Manual);
    assert!(reload.message.as_deref().unwrap_or_default().contains("manually"));

    let cameras = h.app.registry.cameras_for_node(h.node.id).await.unwrap();
    assert_eq!(cameras.len(), 2);
    assert!(cameras.iter().any(|c| c.name == "Gate"));
    assert!(cameras.iter().any(|c| c.name == "Camera cam_2"));
}

#[tokio::test]
async fn live_reload_and_exact_path_removal() {
    let agent = node_agent(json!([{ "id": "cam_12" }])).await;
    let h = harness(agent, Some(router_admin().await)).await;
    let router = h.app.synchronizer.router().clone();
    assert!(router.is_running().await);

    let first = h.app.synchronizer.synchronize(h.node.id).await.unwrap();
    assert_eq!(first.router.reload.as_ref().unwrap().method, ReloadMethod::Api);
    assert!(first.router.is_consistent());

    let table = tokio::fs::read_to_string(&h.table).await.unwrap();
    assert!(table.contains("rtsp://127.0.0.1:8554/cam_12"));
    assert!(table.contains("rtsp://127.0.0.1:8554/cam_12_sub"));
    assert!(table.contains("sourceOnDemand: true"));
    assert!(table.contains("logLevel: info"));

    let removed = router.remove_paths(&["cam_12", "cam_12_sub"]).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(router.list_paths().await, vec!["lobby"]);
}

#[tokio::test]
async fn second_pass_yields_the_same_camera_set() {
    let agent = node_agent(json!([{ "id": "cam_1" }, { "id": "cam_2" }])).await;
    let h = harness(agent, Some(router_admin().await)).await;

    let first = h.app.synchronizer.synchronize(h.node.id).await.unwrap();
    let second = Arc::clone(&h.app.synchronizer)
        .spawn_synchronize(h.node.id)
        .await
        .unwrap()
        .unwrap();

    let paths = |cams: &[nodewatch::models::Camera]| {
        let mut p: Vec<_> = cams.iter().map(|c| c.primary_path.clone()).collect();
        p.sort();
        p
    };
    assert_eq!(paths(&first.cameras), paths(&second.cameras));
    assert_eq!(second.cameras_removed, 2);
    assert_eq!(second.router.paths_removed, 4);
    assert_eq!(second.router.paths_added, 4);
    assert_eq!(h.app.synchronizer.router().list_paths().await.len(), 5);
}

#[tokio::test]
async fn concurrent_passes_for_one_node_do_not_double_apply() {
    let agent = node_agent(json!([{ "id": "cam_1" }])).await;
    let h = harness(agent, Some(router_admin().await)).await;

    let a = Arc::clone(&h.app.synchronizer).spawn_synchronize(h.node.id);
    let b = Arc::clone(&h.app.synchronizer).spawn_synchronize(h.node.id);
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(h.app.registry.cameras_for_node(h.node.id).await.unwrap().len(), 1);
    let mut paths = h.app.synchronizer.router().list_paths().await;
    paths.sort();
    assert_eq!(paths, vec!["cam_1", "cam_1_sub", "lobby"]);
}

#[tokio::test]
async fn watch_after_sync_serves_stream_urls() {
    let agent = node_agent(json!([{ "id": "cam_9" }])).await;
    let h = harness(agent, Some(router_admin().await)).await;
    h.app.synchronizer.synchronize(h.node.id).await.unwrap();

    let ticket = h.app.viewers.watch("7", "browser-1").await.unwrap();
    assert_eq!(ticket.cameras.len(), 1);
    assert_eq!(ticket.cameras[0].main.url, "wss://localhost:8889/cam_9");
    assert_eq!(ticket.statistics.active_viewers, 1);

    let stopped = h.app.viewers.stop("7", "browser-1").await.unwrap();
    assert!(stopped.removed);
    assert_eq!(stopped.remaining_viewers, 0);
}

async fn assert_failed_pass_left_no_trace(h: &Harness, before: &str) {
    let err = h.app.synchronizer.synchronize(h.node.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connectivity);

    let node = h.app.registry.node(h.node.id).await.unwrap();
    assert_eq!(node.status, NodeStatus::Offline);
    assert!(h.app.registry.cameras_for_node(node.id).await.unwrap().is_empty());
    assert_eq!(tokio::fs::read_to_string(&h.table).await.unwrap(), before);
}

#[tokio::test]
async fn agent_server_error_takes_node_offline() {
    let agent = broken_agent(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"boom"}"#).await;
    let h = harness(agent, Some(router_admin().await)).await;
    h.app.liveness.record_heartbeat("7").await.unwrap();
    let before = tokio::fs::read_to_string(&h.table).await.unwrap();

    let err = h.app.synchronizer.synchronize(h.node.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Connectivity { ref reason, .. } if reason.contains("500")));
    assert_failed_pass_left_no_trace(&h, &before).await;
}

#[tokio::test]
async fn malformed_camera_list_takes_node_offline() {
    let agent = broken_agent(StatusCode::OK, r#"{"cameras": [{"name": "#).await;
    let h = harness(agent, Some(router_admin().await)).await;
    h.app.liveness.record_heartbeat("7").await.unwrap();
    let before = tokio::fs::read_to_string(&h.table).await.unwrap();

    assert_failed_pass_left_no_trace(&h, &before).await;
}

#[tokio::test]
async fn second_node_cannot_take_over_a_sub_stream() {
    let (agent, answer) = switchable_agent(json!([{ "id": "x" }])).await;
    let h = harness(agent, Some(router_admin().await)).await;
    h.app.synchronizer.synchronize(h.node.id).await.unwrap();

    let other = h
        .app
        .registry
        .create_node(NewNode {
            name: "N2".into(),
            external_id: "8".into(),
            direct_ip: Some("localhost".into()),
            hostname: None,
        })
        .await
        .unwrap();
    *answer.lock().unwrap() = json!([{ "id": "x_sub" }]);

    let err = h.app.synchronizer.synchronize(other.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(h.app.registry.cameras_for_node(other.id).await.unwrap().is_empty());

    let table = tokio::fs::read_to_string(&h.table).await.unwrap();
    assert!(table.contains("rtsp://127.0.0.1:8554/x_sub"));
    assert!(!table.contains("rtsp://localhost:8554/x_sub"));
    assert_eq!(h.app.registry.cameras_for_node(h.node.id).await.unwrap().len(), 1);
}
