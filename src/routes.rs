use std::sync::Arc;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, Responder, get, post, web};
use actix_ws::Message;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{HarnessError, Stage};
use crate::identity;
use crate::protocol::{Connection, error_frame};
use crate::session::SessionMap;
use crate::store::Variant;

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadRequest {
    pub identity: String,
    pub variant: Variant,
    /// Original upload file name; only meaningful for compiled artifacts
    #[serde(default)]
    pub filename: String,
    pub source: String,
}

#[derive(Deserialize)]
pub struct RunQueryParams {
    pub identity: String,
}

#[derive(Serialize, Deserialize)]
pub struct IdentityResponse {
    pub identity: String,
}

/// Issues a fresh identity token. The collaborator (cookie layer, test
/// client, ...) persists it; reissuing overwrites nothing server-side
/// until the next upload.
#[post("/identity")]
pub async fn post_identity_handler() -> impl Responder {
    HttpResponse::Ok().json(IdentityResponse {
        identity: identity::issue(),
    })
}

/// Upload boundary: persists the artifact, runs the variant's pipeline,
/// and returns the built surface as an ordered method map for the caller
/// to render.
#[post("/artifacts")]
pub async fn post_artifact_handler(
    sessions: web::Data<SessionMap>,
    body: web::Json<UploadRequest>,
) -> impl Responder {
    let body = body.into_inner();
    match sessions
        .register_upload(&body.identity, body.variant, &body.filename, body.source.as_bytes())
        .await
    {
        Ok(surface) => HttpResponse::Ok().json(json!({ "methods": surface })),
        Err(error) => {
            log::warn!("upload for {} failed: {error}", body.identity);
            HttpResponse::build(status_for(&error)).json(error)
        }
    }
}

fn status_for(error: &HarnessError) -> StatusCode {
    match error.stage {
        Stage::Ingest => StatusCode::BAD_REQUEST,
        Stage::Compile | Stage::Load | Stage::Analyze => StatusCode::UNPROCESSABLE_ENTITY,
        Stage::Dispatch => StatusCode::NOT_FOUND,
        Stage::Invoke => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Opens the per-connection test session over a WebSocket.
#[get("/run")]
pub async fn run_session_handler(
    req: HttpRequest,
    body: web::Payload,
    sessions: web::Data<SessionMap>,
    query: web::Query<RunQueryParams>,
) -> actix_web::Result<HttpResponse> {
    let (response, ws, msg_stream) = actix_ws::handle(&req, body)?;
    actix_web::rt::spawn(drive_connection(
        query.into_inner().identity,
        sessions.into_inner(),
        ws,
        msg_stream,
    ));
    Ok(response)
}

/// Runs one connection's state machine to completion.
async fn drive_connection(
    identity: String,
    sessions: Arc<SessionMap>,
    mut ws: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
) {
    let mut connection = Connection::new(identity);

    // Unbound -> Bound, or fail the connection with one diagnostic
    if let Err(error) = connection.bind(&sessions).await {
        log::warn!("{} failed to bind: {error}", connection.identity());
        let _ = ws.text(error_frame(&error).to_string()).await;
        let _ = ws.close(None).await;
        return;
    }

    while let Some(Ok(msg)) = msg_stream.next().await {
        match msg {
            Message::Text(text) => {
                log::debug!("{} says {text}", connection.identity());
                let frame = connection.handle_frame(&text).await;
                if ws.text(frame.to_string()).await.is_err() {
                    break;
                }
            }
            Message::Ping(bytes) => {
                if ws.pong(&bytes).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    connection.close();
    let _ = ws.close(None).await;
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest()
        .json(HarnessError::ingest(format!("malformed request body: {err}")));
    InternalError::from_response(err, response).into()
}
