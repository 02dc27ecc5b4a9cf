//! `PartyServer`: axum HTTP + WebSocket server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::{ConfigError, ServerError};
use crate::events::EventRegistry;
use crate::health::{self, HealthResponse};
use crate::http::{EndpointRouter, ExecutionContext, FetchBody, FetchRequest, FetchResponse, Method};
use crate::lobby::Lobby;
use crate::router::EventRouter;
use crate::session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
pub(crate) struct AppState<C> {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) events: Arc<EventRouter<C>>,
    pub(crate) endpoints: Arc<EndpointRouter<C>>,
    pub(crate) lobby: Arc<Lobby<C>>,
    pub(crate) shutdown: Arc<ShutdownCoordinator>,
    pub(crate) start_time: Instant,
    pub(crate) metrics: Option<PrometheusHandle>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            events: Arc::clone(&self.events),
            endpoints: Arc::clone(&self.endpoints),
            lobby: Arc::clone(&self.lobby),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        }
    }
}

/// Serves rooms over `GET /parties/{room}` and endpoints over plain HTTP.
///
/// | route | behavior |
/// |---|---|
/// | `GET /parties/{room}` | WebSocket upgrade into `room` |
/// | `GET /health` | liveness and counters |
/// | `GET /metrics` | Prometheus text when a handle was supplied |
/// | anything else | the [`EndpointRouter`] |
pub struct PartyServer<C> {
    state: AppState<C>,
}

impl<C: Send + Sync + 'static> PartyServer<C> {
    /// Assemble a server. Room serialization and the invalid-params status
    /// are taken from `config`, which must pass [`ServerConfig::validate`].
    pub fn new(
        config: ServerConfig,
        events: EventRegistry<C>,
        endpoints: EndpointRouter<C>,
        lobby: Lobby<C>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let events = EventRouter::new(events).with_room_serialization(config.serialize_room_dispatch);
        let endpoints = endpoints.with_invalid_params_status(config.invalid_params_status);
        Ok(Self {
            state: AppState {
                config: Arc::new(config),
                events: Arc::new(events),
                endpoints: Arc::new(endpoints),
                lobby: Arc::new(lobby),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        })
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/parties/{room}", get(ws_handler::<C>))
            .route("/health", get(health_handler::<C>))
            .route("/metrics", get(metrics_handler::<C>))
            .fallback(fetch_handler::<C>)
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve in the background until shutdown is signalled.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{}:{}", config.host, config.port),
                source,
            })?;
        let addr = listener.local_addr()?;
        info!(%addr, "partywire server listening");

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Signal shutdown and wait for the serve task and background work.
    pub async fn graceful_shutdown(&self, serve: JoinHandle<()>, timeout: Option<Duration>) {
        self.state.shutdown.graceful_shutdown(vec![serve], timeout).await;
    }

    /// Rooms and contexts.
    pub fn lobby(&self) -> &Arc<Lobby<C>> {
        &self.state.lobby
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Socket message router.
    pub fn events(&self) -> &Arc<EventRouter<C>> {
        &self.state.events
    }

    /// HTTP endpoint router.
    pub fn endpoints(&self) -> &Arc<EndpointRouter<C>> {
        &self.state.endpoints
    }
}

/// GET /parties/{room}
async fn ws_handler<C: Send + Sync + 'static>(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<AppState<C>>,
) -> Response {
    if state.lobby.connection_count() >= state.config.max_connections {
        warn!(room_id = %room, limit = state.config.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }
    let conn_id = Uuid::now_v7().to_string();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| session::run_ws_session(socket, conn_id, room, state))
}

/// GET /health
async fn health_handler<C: Send + Sync + 'static>(
    State(state): State<AppState<C>>,
) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.lobby.connection_count(),
        state.lobby.room_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler<C: Send + Sync + 'static>(State(state): State<AppState<C>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => into_response(FetchResponse::not_found()),
    }
}

/// Everything else goes to the endpoint router.
async fn fetch_handler<C: Send + Sync + 'static>(
    State(state): State<AppState<C>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = Method::parse(method.as_str()) else {
        return into_response(FetchResponse::not_found());
    };

    let mut request = FetchRequest::new(method, uri.path()).with_raw_body(&body);
    request.query = Query::<BTreeMap<String, String>>::try_from_uri(&uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    for (name, value) in &headers {
        let Ok(value) = value.to_str() else { continue };
        let _ = request
            .headers
            .entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }

    let ctx = Arc::clone(state.lobby.global());
    let execution = ExecutionContext::new(state.shutdown.tracker());
    let response = state
        .endpoints
        .on_fetch(request, &state.lobby, &execution, &ctx)
        .await;
    into_response(response)
}

fn into_response(response: FetchResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.body {
        FetchBody::Json(body) => (status, Json(body)).into_response(),
        FetchBody::Text(body) => (status, body).into_response(),
    }
}
