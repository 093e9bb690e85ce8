//! HTTP surface for the grammar corrector
//!
//! ## Endpoints
//!
//! - `POST /correct` - correct one sentence
//!   - 200 `{"status":"success","corrected_sentence":...}`
//!   - 200 `{"status":"error","message":...}` when the model failed to load or inference failed
//!   - 503 `{"status":"loading"}` while the model is still loading
//!   - 400 `{"status":"error","message":...}` for a malformed body
//! - `GET /health` - model readiness, never blocks

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::correction::{CorrectionResult, GrammarCorrector, ModelState, TextUtils};
use crate::error::AppError;

pub mod types;

pub use types::{CorrectionResponse, DebugInfo, HealthResponse};

/// Seconds a client should wait before retrying a 503
pub const RETRY_AFTER_SECS: &str = "3";

const MISSING_SENTENCE: &str = "The request must be a JSON object with a 'sentence' key.";

pub fn router(corrector: GrammarCorrector) -> Router {
    Router::new()
        .route("/correct", post(correct_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(corrector)
}

/// Bind and serve until Ctrl-C or SIGTERM
pub async fn serve(addr: SocketAddr, corrector: GrammarCorrector) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Server(format!("could not bind {}: {}", addr, e)))?;
    info!("🚀 Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(corrector))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("👋 Shutting down");
}

struct CorrectRequest {
    sentence: String,
    debug: bool,
}

fn parse_request(body: &Value) -> Result<CorrectRequest, &'static str> {
    let object = body.as_object().ok_or(MISSING_SENTENCE)?;
    let sentence = match object.get("sentence") {
        None => return Err(MISSING_SENTENCE),
        Some(Value::Null) => String::new(),
        Some(Value::String(sentence)) => sentence.clone(),
        Some(_) => return Err("The 'sentence' key must be a string."),
    };
    let debug = object.get("debug").and_then(Value::as_bool).unwrap_or(false);

    Ok(CorrectRequest { sentence, debug })
}

fn rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected a JSON body with 'Content-Type: application/json'.".to_string()
        }
        _ => format!("Invalid request body: {}", rejection.body_text()),
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(CorrectionResponse::error(message)),
    )
        .into_response()
}

async fn correct_handler(
    State(corrector): State<GrammarCorrector>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("Rejected /correct body: {}", rejection.body_text());
            return bad_request(rejection_message(&rejection));
        }
    };

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(message) => {
            warn!("Rejected /correct body: {}", message);
            return bad_request(message);
        }
    };

    if TextUtils::is_blank(&request.sentence) {
        return Json(CorrectionResponse::success("")).into_response();
    }

    // Inference is CPU-bound, keep it off the async workers.
    let result = if corrector.state() == ModelState::Ready {
        let worker = corrector.clone();
        let sentence = request.sentence.clone();
        match tokio::task::spawn_blocking(move || worker.correct(&sentence)).await {
            Ok(result) => result,
            Err(e) => CorrectionResult::Error(format!("correction task failed: {}", e)),
        }
    } else {
        corrector.correct(&request.sentence)
    };

    match result {
        CorrectionResult::Loading => {
            debug!("⏳ Model still loading, asking client to retry");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                Json(CorrectionResponse::Loading),
            )
                .into_response()
        }
        // Load and inference failures are reported with 200.
        CorrectionResult::Error(message) => Json(CorrectionResponse::error(message)).into_response(),
        CorrectionResult::Success(corrected) => {
            let debug_info = request.debug.then(|| DebugInfo {
                original_sentence: request.sentence.clone(),
                corrected_sentence: corrected.clone(),
                model_name: corrector.model_name().to_string(),
                input_text: corrector.build_prompt(&request.sentence),
                model_ready: corrector.state() == ModelState::Ready,
            });
            Json(CorrectionResponse::Success {
                corrected_sentence: corrected,
                debug_info,
            })
            .into_response()
        }
    }
}

async fn health_handler(State(corrector): State<GrammarCorrector>) -> Json<HealthResponse> {
    let state = corrector.state();
    let message = match &state {
        ModelState::Failed(reason) => Some(reason.clone()),
        _ => None,
    };

    Json(HealthResponse {
        status: state.as_str().to_string(),
        model: corrector.model_name().to_string(),
        message,
    })
}
