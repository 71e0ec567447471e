//! End-to-end tests over a spawned server and a real WebSocket client.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::{App, web};
use awc::error::WsProtocolError;
use awc::ws;
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;

use funtime::config::ToolchainConfig;
use funtime::routes::{
    IdentityResponse, json_error_handler, post_artifact_handler, post_identity_handler,
    run_session_handler,
};
use funtime::session::SessionMap;
use funtime::store::ArtifactStore;
use funtime::toolchain::Toolchain;

// Global counter to keep each test's store root unique
static TEST_STORE_COUNTER: AtomicU32 = AtomicU32::new(0);

// Guard that removes the test store on drop
struct TestStoreGuard {
    root: PathBuf,
}

impl Drop for TestStoreGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            eprintln!("Warning: failed to remove test store {}: {e}", self.root.display());
        }
    }
}

fn spawn_server() -> (actix_test::TestServer, TestStoreGuard) {
    let test_id = TEST_STORE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir()
        .join("funtime-ws-tests")
        .join(format!("{}-{}", std::process::id(), test_id));
    let _ = std::fs::remove_dir_all(&root);

    let sessions = web::Data::new(SessionMap::new(
        Arc::new(ArtifactStore::new(&root).unwrap()),
        Arc::new(Toolchain::new(ToolchainConfig::default())),
    ));
    let srv = actix_test::start(move || {
        App::new()
            .app_data(sessions.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(post_identity_handler)
            .service(post_artifact_handler)
            .service(run_session_handler)
    });
    (srv, TestStoreGuard { root })
}

async fn next_frame<S>(connection: &mut S) -> ws::Frame
where
    S: StreamExt<Item = Result<ws::Frame, WsProtocolError>> + Unpin,
{
    connection
        .next()
        .await
        .expect("connection ended without a frame")
        .expect("websocket protocol error")
}

async fn next_text<S>(connection: &mut S) -> serde_json::Value
where
    S: StreamExt<Item = Result<ws::Frame, WsProtocolError>> + Unpin,
{
    match next_frame(connection).await {
        ws::Frame::Text(bytes) => serde_json::from_slice(&bytes).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[actix_web::test]
async fn ws_session_reports_pass_and_mismatch_frames() {
    let (mut srv, _guard) = spawn_server();

    // Identity and artifact both go through the real HTTP surface
    let mut resp = srv.post("/identity").send().await.unwrap();
    let IdentityResponse { identity } = resp.json().await.unwrap();

    let mut resp = srv
        .post("/artifacts")
        .send_json(&json!({
            "identity": identity,
            "variant": "interpreted",
            "source": "def add(a, b):\n    return a + b\n",
        }))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["methods"], json!({"add": ["a", "b"]}));

    let mut connection = srv.ws_at(&format!("/run?identity={identity}")).await.unwrap();

    connection
        .send(ws::Message::Text(r#"{"add": {"5": [2, 3]}}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut connection).await, json!("pass"));

    connection
        .send(ws::Message::Text(r#"{"add": {"6": [2, 3]}}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut connection).await, json!({"add": ["6", "5"]}));

    connection
        .send(ws::Message::Close(None))
        .await
        .unwrap();
}

#[actix_web::test]
async fn ws_bind_failure_sends_one_diagnostic_then_closes() {
    let (mut srv, _guard) = spawn_server();

    // Valid token, but nothing was ever uploaded under it
    let mut resp = srv.post("/identity").send().await.unwrap();
    let IdentityResponse { identity } = resp.json().await.unwrap();

    let mut connection = srv.ws_at(&format!("/run?identity={identity}")).await.unwrap();

    let frame = next_text(&mut connection).await;
    assert_eq!(frame["error"]["stage"], "dispatch");
    assert_eq!(frame["error"]["detail"], "no artifact bound");

    match next_frame(&mut connection).await {
        ws::Frame::Close(_) => {}
        other => panic!("expected the server to close, got {other:?}"),
    }
}

#[actix_web::test]
async fn ws_ping_is_answered_in_a_live_session() {
    let (mut srv, _guard) = spawn_server();

    let mut resp = srv.post("/identity").send().await.unwrap();
    let IdentityResponse { identity } = resp.json().await.unwrap();
    let resp = srv
        .post("/artifacts")
        .send_json(&json!({
            "identity": identity,
            "variant": "interpreted",
            "source": "def one():\n    return 1\n",
        }))
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let mut connection = srv.ws_at(&format!("/run?identity={identity}")).await.unwrap();

    let payload = web::Bytes::from_static(b"still there?");
    connection
        .send(ws::Message::Ping(payload.clone()))
        .await
        .unwrap();
    match next_frame(&mut connection).await {
        ws::Frame::Pong(bytes) => assert_eq!(bytes, payload),
        other => panic!("expected a pong, got {other:?}"),
    }

    // The session still dispatches after the ping exchange
    connection
        .send(ws::Message::Text(r#"{"one": {"1": []}}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut connection).await, json!("pass"));
}
