// Server module
// HTTP chat endpoint over the query pipeline


use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::completion::ChatMessage;
use crate::query::{QueryError, QueryPipeline};

pub const LIVENESS_MESSAGE: &str = "Everything working fine!!";
pub const MISSING_MESSAGE_ERROR: &str = "Missing or empty 'message' in request body.";
pub const INTERNAL_ERROR: &str = "Internal error";

/// Successful `/chat` response: the question followed by the answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Failures surfaced by the HTTP layer; details stay in the logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatError {
    MissingMessage,
    Internal,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingMessage => (StatusCode::BAD_REQUEST, MISSING_MESSAGE_ERROR),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR),
        };
        let body = ErrorBody {
            message: message.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router; the pipeline is shared by every request
#[inline]
pub fn router(pipeline: Arc<QueryPipeline>) -> Router {
    Router::new()
        .route("/", get(|| async { LIVENESS_MESSAGE }))
        .route("/chat", post(chat))
        .with_state(pipeline)
}

/// Serve the chat API on `listener` until Ctrl-C
#[inline]
pub async fn serve(listener: TcpListener, pipeline: Arc<QueryPipeline>) -> std::io::Result<()> {
    let address = listener.local_addr()?;
    info!("Chat server listening on http://{}", address);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Chat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// The body is taken raw so that malformed JSON gets the same 400 as a missing field
async fn chat(State(pipeline): State<Arc<QueryPipeline>>, body: Bytes) -> Response {
    let Some(message) = extract_message(&body) else {
        debug!("Rejecting chat request without a usable message");
        return ChatError::MissingMessage.into_response();
    };

    match pipeline.answer(&message).await {
        Ok(answer) => {
            if answer.degraded {
                warn!("Answered from partial context");
            }
            let reply = ChatReply {
                messages: vec![
                    ChatMessage::user(message),
                    ChatMessage::system(answer.answer),
                ],
            };
            (StatusCode::OK, Json(reply)).into_response()
        }
        Err(e) if e.is_client_error() => {
            debug!("Rejecting chat request: {}", e);
            ChatError::MissingMessage.into_response()
        }
        Err(e) => {
            log_failure(&e);
            ChatError::Internal.into_response()
        }
    }
}

fn log_failure(error: &QueryError) {
    match error {
        QueryError::Retrieval(e) => error!("Retrieval failed while answering: {}", e),
        QueryError::Completion(e) => error!("Completion failed while answering: {}", e),
        QueryError::Validation(e) => error!("Unexpected validation failure: {}", e),
    }
}

/// The `message` field of a JSON body, if it is a non-blank string
fn extract_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let message = value.get("message")?.as_str()?;
    if message.trim().is_empty() {
        return None;
    }
    Some(message.to_string())
}
