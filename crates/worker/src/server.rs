//! HTTP surface of the worker node
//!
//! Every API response uses the `{code, msg, data}` envelope. Rejections are
//! HTTP 400 with a distinct result code, node-side failures HTTP 500.

use crate::dispatch::Dispatcher;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use opml_common::{NodeError, METRICS};
use opml_proto::{ApiResponse, QuestionRequest, QuestionResponse, StatusResponse, CODE_UNMARSHAL};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, Level};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub node_id: Arc<str>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, node_id: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher,
            node_id: node_id.into(),
        }
    }
}

/// Handler error rendered as a failure envelope
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Body missing, not JSON or the wrong shape
    #[error("Failed to parse request body: {0}")]
    Body(#[from] JsonRejection),
}

impl ApiError {
    fn code(&self) -> i32 {
        match self {
            ApiError::Node(e) => e.result_code(),
            ApiError::Body(_) => CODE_UNMARSHAL,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Node(e) if !e.is_client_error() => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, code = self.code(), "Request rejected");
        }

        if matches!(self, ApiError::Body(_)) {
            METRICS.questions.rejected.with_label_values(&["unmarshal"]).inc();
        }

        let body = ApiResponse::failure(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

/// API routes under `/api/v1`, health and metrics at the root
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/question", post(question))
        .route("/status", post(status))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api)
        .layer(cors_layer())
        .with_state(state)
}

/// Permissive CORS for browser dashboards
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// POST /api/v1/question
async fn question(
    State(state): State<AppState>,
    payload: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<QuestionResponse>>, ApiError> {
    let Json(question) = payload?;
    let req_id = state.dispatcher.submit(question)?;

    Ok(Json(ApiResponse::success(QuestionResponse {
        node_id: state.node_id.to_string(),
        req_id,
    })))
}

/// POST /api/v1/status
async fn status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    Json(ApiResponse::success(StatusResponse {
        status: state.dispatcher.status(),
        node_id: state.node_id.to_string(),
    }))
}

async fn healthcheck() -> &'static str {
    "ok"
}

async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.gather(),
    )
}
