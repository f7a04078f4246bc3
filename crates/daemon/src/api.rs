// WireGuard Tunnel Manager - REST API Module
// HTTP endpoints forwarding UI intents to the session controller

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};
use wg_tunnel_common::{
    ErrorResponse, IntentResponse, SessionEvent, SessionSnapshot, TunnelDetails, TunnelDirectory,
    TunnelLookup, TunnelName, TunnelSummary, TunnelsListResponse,
};

use crate::controller::{Controller, ControllerError};

/// Shared application state
pub struct AppState {
    pub controller: Controller,
    pub tunnels: TunnelDirectory,
    /// Cancelled on daemon shutdown; closes event streams
    pub shutdown: CancellationToken,
}

/// API success response
#[derive(Serialize)]
struct SuccessResponse {
    message: String,
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl From<wg_tunnel_common::Error> for ApiError {
    fn from(e: wg_tunnel_common::Error) -> Self {
        match e {
            wg_tunnel_common::Error::TunnelNotFound(_) => ApiError::NotFound(e.to_string()),
            wg_tunnel_common::Error::InvalidTunnelName(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/session", get(session))
        .route("/api/tunnels", get(list_tunnels))
        .route("/api/tunnels/:name", get(tunnel_details))
        .route("/api/tunnels/:name/select", post(select_tunnel))
        .route("/api/toggle", post(toggle))
        .route("/api/poll", post(request_poll))
        .route("/api/events", get(event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health() -> &'static str {
    "OK"
}

/// Current session snapshot
async fn session(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.snapshot())
}

/// All tunnel configs with selected/active markers
async fn list_tunnels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TunnelsListResponse>, ApiError> {
    let snapshot = state.controller.snapshot();
    let tunnels = state
        .tunnels
        .list_tunnel_names()?
        .into_iter()
        .map(|name| TunnelSummary {
            selected: snapshot.is_selected(&name),
            active: snapshot.is_active(&name),
            name,
        })
        .collect();

    Ok(Json(TunnelsListResponse { tunnels }))
}

fn parse_name(raw: String) -> Result<TunnelName, ApiError> {
    Ok(TunnelName::new(raw)?)
}

/// Redacted config for one tunnel
async fn tunnel_details(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<TunnelDetails>, ApiError> {
    let name = parse_name(name)?;
    let config = state.tunnels.read_tunnel_config(&name)?;
    let snapshot = state.controller.snapshot();

    Ok(Json(TunnelDetails {
        active: snapshot.is_active(&name),
        selected: snapshot.is_selected(&name),
        config,
    }))
}

/// 202 when the intent started a transition, 200 when it was ignored
fn intent_response(response: IntentResponse) -> Response {
    let status = if response.outcome.is_accepted() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

/// Select a tunnel: connect, switch, or disconnect if it is the active one
async fn select_tunnel(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let name = parse_name(name)?;

    // The running tunnel can always be deselected, even if its config vanished
    if !state.tunnels.contains(&name) && !state.controller.snapshot().is_active(&name) {
        return Err(ApiError::NotFound(format!("Tunnel not found: {}", name)));
    }

    let response = state.controller.select_and_connect(name).await?;
    Ok(intent_response(response))
}

async fn toggle(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let response = state.controller.toggle().await?;
    Ok(intent_response(response))
}

async fn request_poll(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.controller.request_poll();
    (
        StatusCode::ACCEPTED,
        Json(SuccessResponse {
            message: "Poll requested".to_string(),
        }),
    )
}

/// GET /api/events → SSE stream of session events
///
/// Opens with the current snapshot so clients need no separate fetch.
async fn event_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading the snapshot so no change falls in between
    let rx = state.controller.subscribe();
    let initial = SessionEvent::StateChanged {
        snapshot: state.controller.snapshot(),
    };

    let session_events = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(event) => to_sse_event(&event),
            Err(lagged) => {
                // A slow client misses events; the next state change catches it up
                debug!("Event stream lagged: {:?}, continuing", lagged);
                None
            }
        }
    });

    let events = stream::iter(to_sse_event(&initial)).chain(stream::select(
        session_events,
        heartbeat_stream(),
    ));

    Sse::new(events.take_until(state.shutdown.clone().cancelled_owned()))
}

fn to_sse_event(event: &SessionEvent) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Ok(Event::default().data(json))),
        Err(e) => {
            error!("Failed to serialize session event: {e}");
            None
        }
    }
}

fn heartbeat_stream() -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(heartbeat_interval()))
        .filter_map(|_| async {
            to_sse_event(&SessionEvent::Heartbeat {
                timestamp: Utc::now(),
            })
        })
}

#[cfg(not(test))]
fn heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
fn heartbeat_interval() -> Duration {
    Duration::from_millis(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerSettings, ControllerTasks};
    use crate::testing::{FakeRunner, StaticLookup};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use wg_tunnel_common::{IntentOutcome, Phase, SseDecoder};

    const OFFICE_CONF: &str = "\
[Interface]
PrivateKey = c2VjcmV0LW9mZmljZQ==
Address = 10.0.0.2/32

[Peer]
PublicKey = officePeerKey=
Endpoint = vpn.example.com:51820
AllowedIPs = 0.0.0.0/0
";

    struct Fixture {
        router: Router,
        state: Arc<AppState>,
        runner: FakeRunner,
        tasks: ControllerTasks,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        async fn new(runner: FakeRunner) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("office.conf"), OFFICE_CONF).unwrap();
            std::fs::write(dir.path().join("home.conf"), "[Peer]\nPublicKey = homePeerKey=\n")
                .unwrap();

            let shutdown = CancellationToken::new();
            let (controller, tasks) = Controller::spawn(
                Arc::new(runner.clone()),
                Arc::new(StaticLookup::new(&["home", "office"])),
                ControllerSettings {
                    poll_interval: Duration::from_secs(3600),
                    stall_threshold: 100,
                    reset_dns_services: Vec::new(),
                },
                shutdown.clone(),
            );

            let mut rx = controller.watch();
            tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.polls >= 1))
                .await
                .unwrap()
                .unwrap();

            let state = Arc::new(AppState {
                controller,
                tunnels: TunnelDirectory::new(dir.path()),
                shutdown,
            });

            Self {
                router: create_router(state.clone()),
                state,
                runner,
                tasks,
                _dir: dir,
            }
        }

        async fn send(&self, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, body.to_vec())
        }

        async fn json(&self, method: &str, uri: &str) -> (StatusCode, Value) {
            let (status, body) = self.send(method, uri).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn shutdown(self) {
            self.state.shutdown.cancel();
            self.tasks.join().await;
        }
    }

    #[tokio::test]
    async fn test_health() {
        let fixture = Fixture::new(FakeRunner::new()).await;
        let (status, body) = fixture.send("GET", "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_tunnels_marks_active() {
        let fixture = Fixture::new(FakeRunner::with_active("office")).await;

        let (status, body) = fixture.send("GET", "/api/tunnels").await;
        assert_eq!(status, StatusCode::OK);
        let list: TunnelsListResponse = serde_json::from_slice(&body).unwrap();
        let names: Vec<&str> = list.tunnels.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["home", "office"]);
        assert!(!list.tunnels[0].active);
        assert!(list.tunnels[1].active);

        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_tunnel_details_are_redacted() {
        let fixture = Fixture::new(FakeRunner::new()).await;

        let (status, body) = fixture.send("GET", "/api/tunnels/office").await;
        assert_eq!(status, StatusCode::OK);
        let details: TunnelDetails = serde_json::from_slice(&body).unwrap();
        assert!(!details.config.redacted.contains("c2VjcmV0LW9mZmljZQ=="));
        assert_eq!(details.config.peers[0].endpoint.as_deref(), Some("vpn.example.com:51820"));
        assert!(!details.active);

        let (status, value) = fixture.json("GET", "/api/tunnels/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(value["error"].as_str().unwrap().contains("missing"));

        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_select_and_toggle() {
        let fixture = Fixture::new(FakeRunner::new()).await;
        fixture.runner.ignore_up(true);

        let (status, body) = fixture.send("POST", "/api/tunnels/office/select").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let response: IntentResponse = serde_json::from_slice(&body).unwrap();
        assert!(matches!(response.outcome, IntentOutcome::Starting { .. }));

        // Still connecting, so the toggle is ignored
        let (status, value) = fixture.json("POST", "/api/toggle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["outcome"]["outcome"], "ignored");
        assert_eq!(value["outcome"]["reason"], "transition_in_flight");

        let (_, value) = fixture.json("GET", "/api/session").await;
        assert_eq!(value["phase"], "connecting");
        assert_eq!(value["selected_tunnel"], "office");

        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_select_rejects_bad_names() {
        let fixture = Fixture::new(FakeRunner::new()).await;

        let (status, _) = fixture.send("POST", "/api/tunnels/nowhere/select").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = fixture.send("POST", "/api/tunnels/-x/select").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(fixture.runner.dispatched().is_empty());
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_request() {
        let fixture = Fixture::new(FakeRunner::new()).await;
        fixture.runner.set_show(crate::testing::show_output("home"));

        let (status, _) = fixture.send("POST", "/api/poll").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let mut rx = fixture.state.controller.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.phase == Phase::Connected))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(snapshot.active_tunnel.to_string(), "home");

        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_event_stream_starts_with_snapshot_and_closes() {
        let fixture = Fixture::new(FakeRunner::new()).await;

        let request = Request::builder()
            .uri("/api/events")
            .body(Body::empty())
            .unwrap();
        let response = fixture.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while events.len() < 2 {
            let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
                .await
                .expect("no event within timeout")
                .expect("stream ended early")
                .unwrap();
            events.extend(decoder.push(&chunk));
        }

        assert!(matches!(events[0], SessionEvent::StateChanged { .. }));
        assert!(events[1..]
            .iter()
            .any(|e| matches!(e, SessionEvent::Heartbeat { .. })));

        fixture.state.shutdown.cancel();
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while body.next().await.is_some() {}
        })
        .await;
        assert!(end.is_ok(), "event stream did not close on shutdown");

        fixture.tasks.join().await;
    }

    #[tokio::test]
    async fn heartbeat_stream_emits() {
        // The filter_map future makes the stream !Unpin
        let mut stream = Box::pin(heartbeat_stream());
        let _evt = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("heartbeat timed out")
            .expect("stream ended");
    }
}
