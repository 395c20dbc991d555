//! HTTP API server with SSE support

use super::events::{ChannelSink, SessionEvent, SubscriberId};
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::ledger::{HistoryQuery, QueryResult};
use crate::session::{RunSnapshot, Session};
use crate::types::Message;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, convert::Infallible, future::IntoFuture, sync::Arc};
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

/// API server state
#[derive(Clone)]
struct AppState {
    session: Arc<Session>,
    /// Buffered events per SSE client before it counts as too slow
    channel_capacity: usize,
}

/// API server
pub struct ApiServer {
    config: ServerConfig,
    session: Arc<Session>,
    channel_capacity: usize,
}

impl ApiServer {
    /// Create new API server
    pub fn new(config: ServerConfig, session: Arc<Session>, channel_capacity: usize) -> Self {
        Self {
            config,
            session,
            channel_capacity,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Router with every route and middleware attached
    pub fn router(&self) -> Router {
        Self::build_router(AppState {
            session: Arc::clone(&self.session),
            channel_capacity: self.channel_capacity,
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            // Event streaming
            .route("/events", get(events_handler))
            // Conversation
            .route("/messages", get(list_messages_handler).post(send_message_handler))
            .route("/action", post(action_handler))
            .route("/plan", post(plan_handler))
            .route("/stop", post(stop_handler))
            // Run state
            .route("/status", get(status_handler))
            .route("/tools/active", get(active_tools_handler))
            // Health check
            .route("/health", get(health_handler))
            // State
            .with_state(state)
            // Middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until Ctrl-C, then stop the agent
    pub async fn serve(self) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        info!("API server listening on http://{}", listener.local_addr()?);

        // open SSE streams never finish on their own, so drop them on shutdown
        // instead of draining connections
        tokio::select! {
            result = axum::serve(listener, router).into_future() => result?,
            _ = shutdown_signal() => info!("Shutdown signal received"),
        }

        info!("API server shutting down");
        self.session.stop_agent().await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Error response: `{"error": message, "kind": name}`
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(RelayError::InvalidQuery(rejection.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(RelayError::InvalidRequest(rejection.body_text()))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::InvalidQuery(_) | RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Busy | RelayError::NoActiveQuestion | RelayError::NoActivePlan => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Unregisters an SSE subscriber when its response stream is dropped
struct SubscriptionGuard {
    session: Arc<Session>,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        let id = self.id;
        runtime.spawn(async move {
            if session.disconnect(id).await {
                debug!("SSE client {} disconnected", id);
            }
        });
    }
}

fn to_sse(event: &SessionEvent) -> Option<SseEvent> {
    match event.data_json() {
        Ok(data) => Some(SseEvent::default().event(event.name()).data(data)),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}

/// SSE events handler
///
/// The client gets `init` with the ledger and run state first, then every
/// live event in order.
async fn events_handler(
    State(state): State<AppState>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>> {
    let (sink, rx) = ChannelSink::new(state.channel_capacity);
    let id = state.session.connect(Arc::new(sink)).await?;
    debug!("New SSE client {} connected", id);

    let guard = SubscriptionGuard {
        session: Arc::clone(&state.session),
        id,
    };
    let stream = ReceiverStream::new(rx).filter_map(move |event| {
        let _guard = &guard;
        to_sse(&event).map(Ok::<_, Infallible>)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Paginated history
async fn list_messages_handler(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<QueryResult>> {
    let Query(query) = query?;
    Ok(Json(state.session.query(&query).await?))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
}

async fn send_message_handler(
    State(state): State<AppState>,
    request: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Json(request) = request?;
    let message = state.session.send_message(request.content).await?;
    Ok((StatusCode::ACCEPTED, Json(message)))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    answers: BTreeMap<String, String>,
}

async fn action_handler(
    State(state): State<AppState>,
    request: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = request?;
    state.session.send_action(request.answers).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    approved: bool,
}

async fn plan_handler(
    State(state): State<AppState>,
    request: Result<Json<PlanRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = request?;
    state.session.approve_plan(request.approved).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn stop_handler(State(state): State<AppState>) -> ApiResult<Json<RunSnapshot>> {
    state.session.stop_agent().await?;
    Ok(Json(state.session.status().await))
}

async fn status_handler(State(state): State<AppState>) -> Json<RunSnapshot> {
    Json(state.session.status().await)
}

async fn active_tools_handler(State(state): State<AppState>) -> Json<Vec<Message>> {
    Json(state.session.active_tool_executions().await)
}

/// Health check handler
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    subscribers: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subscribers: state.session.broadcaster().subscriber_count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCollaborator, AgentEventStream, AgentInput};
    use crate::api::events::Broadcaster;
    use crate::error::Result;
    use crate::ledger::Ledger;
    use async_trait::async_trait;

    struct IdleAgent;

    #[async_trait]
    impl AgentCollaborator for IdleAgent {
        async fn start(&self, _resume: Option<String>) -> Result<AgentEventStream> {
            Ok(Box::pin(tokio_stream::pending::<serde_json::Value>()))
        }

        async fn send(&self, _input: AgentInput) -> Result<()> {
            Ok(())
        }

        async fn interrupt(&self) -> Result<()> {
            Ok(())
        }
    }

    fn test_state() -> AppState {
        AppState {
            session: Session::new(Ledger::default(), Broadcaster::default(), Arc::new(IdleAgent)),
            channel_capacity: 16,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = health_handler(State(test_state())).await;
        assert_eq!(response.0.status, "ok");
        assert_eq!(response.0.subscribers, 0);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let cases = [
            (RelayError::InvalidQuery("x".into()), StatusCode::BAD_REQUEST),
            (RelayError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (RelayError::Busy, StatusCode::CONFLICT),
            (RelayError::NoActiveQuestion, StatusCode::CONFLICT),
            (RelayError::NoActivePlan, StatusCode::CONFLICT),
            (RelayError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_status_starts_stable() {
        let Json(snapshot) = status_handler(State(test_state())).await;
        assert_eq!(snapshot, RunSnapshot::default());
    }
}
