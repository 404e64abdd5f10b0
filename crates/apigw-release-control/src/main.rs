//! API Gateway Release Control - internal publish service
//!
//! This is the main entry point of the release orchestration service.
//! It accepts publish triggers from the API layer and completion callbacks
//! from the rollout backends.

use std::sync::Arc;

use apigw_release_control::{
    AttemptId, Dispatcher, DispatchRequest, DispatchResult, ExecutionMode, PublishError,
    PublisherConfig, TaskId, TaskOutcome,
};
use apigw_release_core::{CoreError, GatewayId};
use apigw_release_store::{RocksStore, Store};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
struct AppState<S: Store + 'static> {
    dispatcher: Arc<Dispatcher<S>>,
}

impl<S: Store + 'static> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

/// A `PublishError` rendered as an HTTP response.
struct ApiError(PublishError);

impl<E: Into<PublishError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.http_status_code();
        if code >= 500 {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "apigw-release-control",
    })
}

async fn ready_handler<S: Store + 'static>(State(state): State<AppState<S>>) -> impl IntoResponse {
    match state.dispatcher.store().get_gateway(GatewayId::new(0)) {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Store not ready");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn publish_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Json(request): Json<DispatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Callers never block on rollouts through the service.
    let request = request.with_mode(ExecutionMode::Async);
    let result = state.dispatcher.trigger(request).await?;

    let status = match result {
        DispatchResult::Dispatched(_) => StatusCode::ACCEPTED,
        DispatchResult::NothingToDo | DispatchResult::NotDispatched { .. } => StatusCode::OK,
    };
    Ok((status, Json(result.summary())))
}

async fn complete_task_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(task_id): Path<String>,
    Json(outcome): Json<TaskOutcome>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id: TaskId = task_id.parse()?;
    let task = state.dispatcher.scheduler().complete_task(&task_id, &outcome)?;
    Ok(Json(task))
}

async fn attempt_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let attempt_id: AttemptId = attempt_id.parse()?;
    let attempt = state
        .dispatcher
        .store()
        .get_attempt(&attempt_id)?
        .ok_or(CoreError::AttemptNotFound(attempt_id))?;
    Ok(Json(attempt))
}

fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<S>))
        .route("/internal/v1/publish", post(publish_handler::<S>))
        .route(
            "/internal/v1/tasks/:task_id/complete",
            post(complete_task_handler::<S>),
        )
        .route("/internal/v1/attempts/:attempt_id", get(attempt_handler::<S>))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,apigw_release=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API Gateway Release Control");

    let config = PublisherConfig::from_env();

    // Initialize store
    let store = Arc::new(RocksStore::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir, "Initialized RocksDB store");

    let dispatcher = Arc::new(Dispatcher::from_config(store, &config)?);
    let app = create_router(AppState { dispatcher });

    // Start server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
