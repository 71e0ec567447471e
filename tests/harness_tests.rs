use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::{App, test, web};
use assert_json_diff::assert_json_eq;
use pretty_assertions::assert_eq;
use serde_json::json;

use funtime::config::ToolchainConfig;
use funtime::identity;
use funtime::protocol::Connection;
use funtime::routes::{
    IdentityResponse, json_error_handler, post_artifact_handler, post_identity_handler,
};
use funtime::session::SessionMap;
use funtime::store::ArtifactStore;
use funtime::surface::CallableSurface;
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

fn create_sessions(toolchain: ToolchainConfig) -> (web::Data<SessionMap>, TestStoreGuard) {
    let test_id = TEST_STORE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir()
        .join("funtime-integration")
        .join(format!("{}-{}", std::process::id(), test_id));
    let _ = std::fs::remove_dir_all(&root);

    let sessions = SessionMap::new(
        Arc::new(ArtifactStore::new(&root).unwrap()),
        Arc::new(Toolchain::new(toolchain)),
    );
    (web::Data::new(sessions), TestStoreGuard { root })
}

macro_rules! init_app {
    ($sessions:expr) => {
        test::init_service(
            App::new()
                .app_data($sessions.clone())
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(post_identity_handler)
                .service(post_artifact_handler),
        )
        .await
    };
}

const ADD_MODULE: &str = "def add(a, b):\n    return a + b\n";

fn upload_request(identity: &str, variant: &str, filename: &str, source: &str) -> test::TestRequest {
    test::TestRequest::post().uri("/artifacts").set_json(json!({
        "identity": identity,
        "variant": variant,
        "filename": filename,
        "source": source,
    }))
}

#[actix_web::test]
async fn identity_endpoint_issues_valid_tokens() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);

    let resp = test::call_service(&app, test::TestRequest::post().uri("/identity").to_request())
        .await;
    assert!(resp.status().is_success());

    let body: IdentityResponse = test::read_body_json(resp).await;
    assert!(identity::is_valid(&body.identity));
}

#[actix_web::test]
async fn upload_returns_the_surface_the_session_later_accepts() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);
    let id = identity::issue();

    let source = "def add(a, b):\n    return a + b\n\ndef shout(word):\n    return word + '!'\n";
    let resp = test::call_service(
        &app,
        upload_request(&id, "interpreted", "", source).to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_eq!(
        body["methods"],
        json!({"add": ["a", "b"], "shout": ["word"]})
    );

    // Round-trip: the rendered surface re-parses into exactly the method
    // set dispatch accepts
    let rendered: CallableSurface = serde_json::from_value(body["methods"].clone()).unwrap();
    let mut connection = Connection::new(id);
    let session = connection.bind(&sessions).await.unwrap();
    assert_eq!(rendered, session.surface);
}

#[actix_web::test]
async fn uploaded_module_passes_and_fails_the_concrete_scenarios() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);
    let id = identity::issue();

    let resp = test::call_service(
        &app,
        upload_request(&id, "interpreted", "", ADD_MODULE).to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let mut connection = Connection::new(id);
    connection.bind(&sessions).await.unwrap();

    let frame = connection.handle_frame(r#"{"add": {"5": [2, 3]}}"#).await;
    assert_eq!(frame, json!("pass"));

    let frame = connection.handle_frame(r#"{"add": {"6": [2, 3]}}"#).await;
    assert_eq!(frame, json!({"add": ["6", "5"]}));
}

#[actix_web::test]
async fn broken_script_upload_is_rejected_once_with_a_load_error() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);
    let id = identity::issue();

    let resp = test::call_service(
        &app,
        upload_request(&id, "interpreted", "", "def broken(:\n    return 1\n").to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 422);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["stage"], "load");

    // Nothing was bound, so the session fails with the dispatch diagnostic
    let mut connection = Connection::new(id);
    let err = connection.bind(&sessions).await.unwrap_err();
    assert_eq!(err.detail, "no artifact bound");
}

#[actix_web::test]
async fn compile_failure_surfaces_at_upload_and_leaves_nothing_bound() {
    let mut toolchain = ToolchainConfig::default();
    toolchain.compile = vec![
        "sh".into(),
        "-c".into(),
        "echo 'Calc.java:1: error: reached end of file' >&2; exit 1".into(),
    ];
    let (sessions, _guard) = create_sessions(toolchain);
    let app = init_app!(sessions);
    let id = identity::issue();

    let resp = test::call_service(
        &app,
        upload_request(&id, "compiled", "Calc.java", "class Calc {").to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 422);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["stage"], "compile");
    assert!(
        body["detail"].as_str().unwrap().contains("reached end of file"),
        "compiler output must be user-visible: {body}"
    );

    let mut connection = Connection::new(id.clone());
    let err = connection.bind(&sessions).await.unwrap_err();
    assert_eq!(err.detail, "no artifact bound");

    // A frame on the never-bound connection is rejected, not crashed on
    let frame = connection.handle_frame(r#"{"add": {"5": [2, 3]}}"#).await;
    assert_eq!(frame["error"]["stage"], "dispatch");
}

#[actix_web::test]
async fn compiled_upload_runs_cases_through_the_runner() {
    // Stand-in toolchain: compilation always succeeds, the analyzer
    // reports add(int, int), and the runner computes the sum with the
    // shell so mismatches are real
    let mut toolchain = ToolchainConfig::default();
    toolchain.compile = vec!["true".into()];
    toolchain.analyze = vec![
        "sh".into(),
        "-c".into(),
        r#"echo '[{"add": ["int", "int"]}]'"#.into(),
    ];
    toolchain.run = vec![
        "sh".into(),
        "-c".into(),
        "echo \"$0\" | awk -F, '{print $1 + $2}'".into(),
        "%ARGS%".into(),
    ];
    let (sessions, _guard) = create_sessions(toolchain);
    let app = init_app!(sessions);
    let id = identity::issue();

    let resp = test::call_service(
        &app,
        upload_request(&id, "compiled", "Calc.java", "class Calc {}").to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["methods"], json!({"add": ["int", "int"]}));

    let mut connection = Connection::new(id);
    connection.bind(&sessions).await.unwrap();

    let frame = connection.handle_frame(r#"{"add": {"5": [2, 3]}}"#).await;
    assert_eq!(frame, json!("pass"));

    let frame = connection.handle_frame(r#"{"add": {"7": [2, 3]}}"#).await;
    assert_eq!(frame, json!({"add": ["7", "5"]}));
}

#[actix_web::test]
async fn upload_with_foreign_identity_is_rejected() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);

    let resp = test::call_service(
        &app,
        upload_request("../../escape", "interpreted", "", ADD_MODULE).to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["stage"], "ingest");
}

#[actix_web::test]
async fn malformed_upload_body_is_a_bad_request() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);

    let req = test::TestRequest::post()
        .uri("/artifacts")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"identity\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn concurrent_uploads_stay_per_identity_over_http() {
    let (sessions, _guard) = create_sessions(ToolchainConfig::default());
    let app = init_app!(sessions);
    let id_a = identity::issue();
    let id_b = identity::issue();

    let req_a = upload_request(&id_a, "interpreted", "", "def alpha():\n    return 1\n");
    let req_b = upload_request(&id_b, "interpreted", "", "def beta():\n    return 2\n");
    let (resp_a, resp_b) = futures_util::join!(
        test::call_service(&app, req_a.to_request()),
        test::call_service(&app, req_b.to_request()),
    );
    assert!(resp_a.status().is_success() && resp_b.status().is_success());

    let body_a: serde_json::Value = test::read_body_json(resp_a).await;
    let body_b: serde_json::Value = test::read_body_json(resp_b).await;
    assert_eq!(body_a["methods"], json!({"alpha": []}));
    assert_eq!(body_b["methods"], json!({"beta": []}));
}
