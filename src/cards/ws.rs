//! WebSocket server + REST endpoints for a deck.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::gesture::{Decision, GestureCoordinator};
use super::model::{CardPayload, DeckAction, SwipeDirection};
use super::queue::Deck;
use crate::error::DeckError;
use crate::providers::CardProvider;

/// Application state shared across handlers.
pub struct AppState<P: CardProvider> {
    pub gestures: Arc<GestureCoordinator<P>>,
}

impl<P: CardProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            gestures: Arc::clone(&self.gestures),
        }
    }
}

impl<P: CardProvider> AppState<P> {
    fn deck(&self) -> &Arc<Deck<P>> {
        self.gestures.deck()
    }
}

/// Build the Axum router with the deck's WebSocket and REST routes.
///
/// Taps from every client go through the one `GestureCoordinator`, so a
/// REST swipe and a WS swipe share its busy flag. Each WS connection drags
/// with its own coordinator over the same deck.
pub fn deck_routes<P>(gestures: Arc<GestureCoordinator<P>>) -> Router
where
    P: CardProvider,
    P::Payload: Serialize,
{
    Router::new()
        .route("/ws", get(ws_handler::<P>))
        .route("/health", get(health))
        .route("/api/deck", get(snapshot::<P>))
        .route("/api/deck/swipe/{direction}", post(swipe::<P>))
        .route("/api/deck/refill", post(refill::<P>))
        .layer(CorsLayer::permissive())
        .with_state(AppState { gestures })
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "decision-deck"
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler<P>(ws: WebSocketUpgrade, State(state): State<AppState<P>>) -> impl IntoResponse
where
    P: CardProvider,
    P::Payload: Serialize,
{
    info!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// `value` serialized with a `"type": kind` tag added.
fn typed_frame(kind: &str, value: impl Serialize) -> Option<String> {
    let mut frame = match serde_json::to_value(value) {
        Ok(value) => value,
        Err(e) => {
            warn!(kind, error = %e, "Failed to serialize frame");
            return None;
        }
    };
    if let Value::Object(fields) = &mut frame {
        fields.insert("type".into(), Value::String(kind.into()));
    }
    Some(frame.to_string())
}

/// The current snapshot as a `{"type":"snapshot", ...}` frame.
async fn snapshot_frame<P>(deck: &Deck<P>) -> Option<String>
where
    P: CardProvider,
    P::Payload: Serialize,
{
    typed_frame("snapshot", deck.snapshot().await)
}

async fn handle_socket<P>(mut socket: WebSocket, state: AppState<P>)
where
    P: CardProvider,
    P::Payload: Serialize,
{
    info!("WebSocket client connected");

    // Drag state belongs to this connection; commits still go through the deck lock.
    let drag = GestureCoordinator::new(Arc::clone(state.deck()));

    // Subscribe before the initial snapshot so nothing falls in between.
    let mut rx = state.deck().subscribe();

    if let Some(frame) = snapshot_frame(state.deck()).await {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            warn!("Failed to send initial snapshot, client disconnected");
            return;
        }
    }

    loop {
        tokio::select! {
            // Forward deck events to this client
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind deck events");
                        if let Some(frame) = snapshot_frame(state.deck()).await {
                            if socket.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Deck event channel closed");
                        break;
                    }
                }
            }

            // Receive actions from client
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&text, &state, &drag).await {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Apply one client frame. Drag actions answer with a `{"type":"gesture"}`
/// frame carrying the connection's drag state.
async fn handle_client_message<P: CardProvider>(
    text: &str,
    state: &AppState<P>,
    drag: &GestureCoordinator<P>,
) -> Option<String> {
    let action = match serde_json::from_str::<DeckAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return None;
        }
    };

    match action {
        DeckAction::Swipe { direction } => {
            log_decision(state.gestures.tap(direction).await, direction, "WS swipe");
            None
        }
        DeckAction::Refill => {
            match state.deck().refill().await {
                Ok(appended) => info!(appended, "Deck refilled via WS"),
                Err(e) => warn!(error = %e, "Refill failed via WS"),
            }
            None
        }
        DeckAction::PointerDown { card_id, pointer } => {
            if !drag.pointer_down(&card_id, pointer).await {
                debug!(%card_id, "WS drag not started");
            }
            typed_frame("gesture", drag.state())
        }
        DeckAction::PointerMove {
            pointer,
            card_center,
            surface,
        } => typed_frame("gesture", drag.pointer_move(pointer, card_center, surface)),
        DeckAction::DragEnd => {
            drag.drag_end();
            typed_frame("gesture", drag.state())
        }
        DeckAction::Drop => {
            let zone = drag.state().hover_zone;
            match zone.direction() {
                Some(direction) => log_decision(drag.drop_card().await, direction, "WS drop"),
                None => {
                    drag.drag_end();
                    debug!("WS drop outside a zone");
                }
            }
            typed_frame("gesture", drag.state())
        }
    }
}

fn log_decision<T: CardPayload>(decision: Result<Decision<T>, DeckError>, direction: SwipeDirection, via: &str) {
    match decision {
        Ok(Decision::Committed { card, .. }) => {
            info!(card_id = %card.id(), %direction, via, "Card swiped");
        }
        Ok(Decision::Busy) => debug!(%direction, via, "Ignored: commit in progress"),
        Ok(Decision::Cancelled) => debug!(%direction, via, "Ignored: card is no longer on top"),
        Ok(Decision::Empty) => debug!(%direction, via, "Ignored: no current card"),
        Err(e) => warn!(%direction, via, error = %e, "Swipe failed"),
    }
}

// ── REST Endpoints ──────────────────────────────────────────────────────

async fn snapshot<P>(State(state): State<AppState<P>>) -> impl IntoResponse
where
    P: CardProvider,
    P::Payload: Serialize,
{
    Json(state.deck().snapshot().await)
}

fn error_response(e: &DeckError) -> Response {
    let status = match e {
        DeckError::Auth(_) => StatusCode::UNAUTHORIZED,
        DeckError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        DeckError::Fetch(_) | DeckError::Commit(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({"error": e.to_string()}))).into_response()
}

async fn swipe<P: CardProvider>(
    State(state): State<AppState<P>>,
    Path(direction): Path<String>,
) -> Response {
    let direction: SwipeDirection = match direction.parse() {
        Ok(direction) => direction,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e}))).into_response();
        }
    };

    match state.gestures.tap(direction).await {
        Ok(Decision::Committed { direction, card }) => {
            let remaining = state.deck().remaining().await;
            info!(card_id = %card.id(), %direction, "Card swiped via REST");
            (
                StatusCode::OK,
                Json(json!({
                    "card": card.metadata(),
                    "direction": direction,
                    "remaining": remaining
                })),
            )
                .into_response()
        }
        Ok(Decision::Busy) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "Previous swipe still in progress"})),
        )
            .into_response(),
        Ok(Decision::Empty | Decision::Cancelled) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(%direction, error = %e, "Swipe failed via REST");
            error_response(&e)
        }
    }
}

async fn refill<P: CardProvider>(State(state): State<AppState<P>>) -> Response {
    match state.deck().refill().await {
        Ok(appended) => (
            StatusCode::OK,
            Json(json!({
                "appended": appended,
                "remaining": state.deck().remaining().await
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Refill failed via REST");
            error_response(&e)
        }
    }
}
