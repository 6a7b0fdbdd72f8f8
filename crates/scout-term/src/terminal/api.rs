//! Terminal gateway routes
//!
//! WebSocket attach plus the small REST surface around it. Every terminal
//! route authenticates before doing anything else.

use super::session::{TerminalSession, Viewer};
use super::state::SessionRegistry;
use super::types::{
    ClientMessage, Geometry, GeometryQuery, RestartResponse, ServerMessage, SessionId,
    TerminalStatus,
};
use crate::auth::Authenticator;
use crate::errors::GatewayError;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared state for the gateway routes
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub auth: Arc<dyn Authenticator>,
}

impl GatewayState {
    pub fn new(registry: Arc<SessionRegistry>, auth: Arc<dyn Authenticator>) -> Self {
        Self { registry, auth }
    }
}

/// The caller's session, extracted from its auth cookie.
///
/// Rejects with 401 before any later extractor (including the WebSocket
/// upgrade) runs.
pub struct AuthenticatedSession(pub SessionId);

impl FromRequestParts<GatewayState> for AuthenticatedSession {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GatewayState,
    ) -> Result<Self, Self::Rejection> {
        state
            .auth
            .authenticate(&parts.headers)
            .map(AuthenticatedSession)
            .map_err(|e| {
                warn!(path = %parts.uri.path(), "Rejected unauthenticated request: {}", e);
                GatewayError::Unauthorized(e)
            })
    }
}

/// Build terminal routes
pub fn terminal_routes() -> Router<GatewayState> {
    Router::new()
        .route("/ws/terminal", any(terminal_websocket))
        .route("/api/terminal/restart", post(restart_terminal))
        .route("/api/terminal/status", get(terminal_status))
}

/// Build the full gateway application.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(terminal_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Tear down the caller's terminal. The next connection gets a fresh one.
async fn restart_terminal(
    AuthenticatedSession(session_id): AuthenticatedSession,
    State(state): State<GatewayState>,
) -> Json<RestartResponse> {
    let existed = state.registry.destroy(&session_id);
    info!(session_id = %session_id, existed, "Terminal restart requested");
    Json(RestartResponse { ok: true })
}

async fn terminal_status(
    AuthenticatedSession(session_id): AuthenticatedSession,
    State(state): State<GatewayState>,
) -> Json<TerminalStatus> {
    let terminal = state.registry.get(&session_id).map(|s| s.to_info());
    Json(TerminalStatus {
        active: terminal.is_some(),
        terminal,
    })
}

/// WebSocket for terminal I/O
async fn terminal_websocket(
    AuthenticatedSession(session_id): AuthenticatedSession,
    State(state): State<GatewayState>,
    Query(query): Query<GeometryQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let geometry = query.geometry();
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_terminal_websocket(socket, registry, session_id, geometry))
}

// =============================================================================
// WebSocket handlers
// =============================================================================

type WsSender = SplitSink<WebSocket, Message>;

async fn send_message(sender: &mut WsSender, message: &ServerMessage) -> Result<(), axum::Error> {
    sender.send(Message::Text(message.to_json().into())).await
}

/// Tell a viewer that no terminal is available, then hang up.
async fn reject_viewer(mut sender: WsSender) {
    let _ = send_message(&mut sender, &ServerMessage::Exit).await;
    let _ = sender.close().await;
}

/// Handle a terminal WebSocket connection
async fn handle_terminal_websocket(
    socket: WebSocket,
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    geometry: Geometry,
) {
    let (ws_sender, mut ws_receiver) = socket.split();

    if let Err(e) = registry.get_or_create(&session_id, geometry) {
        error!("[ws:{}] Could not start terminal: {}", session_id, e);
        reject_viewer(ws_sender).await;
        return;
    }

    let (viewer, mut viewer_rx) = Viewer::new();
    let viewer_id = viewer.id();
    let session = match registry.attach(&session_id, viewer) {
        Ok(attachment) => attachment.session,
        Err(e) => {
            warn!("[ws:{}] Attach failed: {}", session_id, e);
            reject_viewer(ws_sender).await;
            return;
        }
    };

    info!("[ws:{}] Viewer {} connected", session_id, viewer_id);

    // Forward replayed scrollback, live output and the final exit.
    let session_id_clone = session_id.clone();
    let mut output_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(message) = viewer_rx.recv().await {
            let is_exit = message == ServerMessage::Exit;
            if send_message(&mut ws_sender, &message).await.is_err() {
                return;
            }
            if is_exit {
                break;
            }
        }
        let _ = ws_sender.close().await;
        debug!("[ws:{}] Output task finished", session_id_clone);
    });

    loop {
        tokio::select! {
            _ = &mut output_task => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_client_frame(&session, text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    handle_client_frame(&session, &String::from_utf8_lossy(&data))
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("[ws:{}] Client closed connection", session_id);
                    break;
                }
                Some(Err(e)) => {
                    debug!("[ws:{}] WebSocket error: {}", session_id, e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    output_task.abort();
    registry.detach(&session_id, viewer_id);
    info!("[ws:{}] Viewer {} disconnected", session_id, viewer_id);
}

/// Apply one client frame to the session. Bad frames are dropped.
fn handle_client_frame(session: &TerminalSession, text: &str) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Input { data }) => {
            if let Err(e) = session.write_input(&data) {
                debug!("[ws:{}] Input dropped: {}", session.id, e);
            }
        }
        Ok(ClientMessage::Resize(geometry)) => {
            if let Err(e) = session.resize(geometry) {
                debug!("[ws:{}] Resize ignored: {}", session.id, e);
            }
        }
        Err(e) => debug!("[ws:{}] Ignoring client frame: {}", session.id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CookieAuthenticator;
    use crate::config::RegistryConfig;
    use crate::terminal::pty::Spawner;
    use crate::terminal::testing::FakeSpawner;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"gateway-secret";

    fn setup() -> (Router, Arc<SessionRegistry>, Arc<FakeSpawner>, String) {
        let spawner = FakeSpawner::new();
        let registry = SessionRegistry::new(
            Arc::clone(&spawner) as Arc<dyn Spawner>,
            RegistryConfig::default(),
        );
        let auth = CookieAuthenticator::new("scout_session", SECRET);
        let token = auth
            .issue_token("browser-1", Duration::from_secs(600))
            .unwrap();
        let state = GatewayState::new(Arc::clone(&registry), Arc::new(auth));
        (build_router(state), registry, spawner, format!("scout_session={token}"))
    }

    fn upgrade_request(cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/ws/terminal?cols=100&rows=40")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _, _, _) = setup();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unauthenticated_upgrade_is_rejected_without_spawning() {
        let (app, registry, spawner, _) = setup();

        let response = app.clone().oneshot(upgrade_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(upgrade_request(Some("scout_session=forged")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(registry.session_count(), 0);
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_requires_auth() {
        let (app, _, _, _) = setup();
        let response = app
            .oneshot(
                Request::post("/api/terminal/restart")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_restart_destroys_callers_session_only() {
        let (app, registry, spawner, cookie) = setup();
        registry
            .get_or_create(&SessionId::new("browser-1"), Geometry::default())
            .unwrap();
        registry
            .get_or_create(&SessionId::new("browser-2"), Geometry::default())
            .unwrap();

        let response = app
            .oneshot(
                Request::post("/api/terminal/restart")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(registry.get(&SessionId::new("browser-1")).is_none());
        assert!(registry.get(&SessionId::new("browser-2")).is_some());
        assert!(!spawner.process(0).is_running());
        assert!(spawner.process(1).is_running());
        // Restart never spawns a replacement by itself.
        assert_eq!(spawner.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_restart_without_session_still_succeeds() {
        let (app, _, spawner, cookie) = setup();
        let response = app
            .oneshot(
                Request::post("/api/terminal/restart")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_status_reports_session() {
        let (app, registry, _, cookie) = setup();

        let request = || {
            Request::get("/api/terminal/status")
                .header(header::COOKIE, cookie.clone())
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: TerminalStatus = serde_json::from_slice(&body).unwrap();
        assert!(!status.active);

        registry
            .get_or_create(&SessionId::new("browser-1"), Geometry::new(90, 20))
            .unwrap();
        let response = app.oneshot(request()).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: TerminalStatus = serde_json::from_slice(&body).unwrap();
        assert!(status.active);
        let info = status.terminal.unwrap();
        assert_eq!(info.session_id, SessionId::new("browser-1"));
        assert_eq!((info.cols, info.rows), (90, 20));
        assert_eq!(info.viewers, 0);
    }
}
