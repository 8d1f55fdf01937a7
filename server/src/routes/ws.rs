//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from session peers → forward to client
//!
//! Handler functions validate fields, call a service, and return an
//! `Outcome`. The dispatch layer owns all outbound concerns: reply to sender
//! and broadcast to peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `session:create` / `session:join` binds one participant to the connection
//!    (a failed request keeps the previous binding)
//! 3. Client sends frames → dispatch → handler returns Outcome
//! 4. Close → participant goes inactive, peers get `participant_left`

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use presence::{ControlMode, ParticipantId, SessionEvent, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status, event_data};
use crate::services;
use crate::services::session::{Membership, Resume, SessionError};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what. Handlers never send frames directly.
enum Outcome {
    /// Broadcast done+data to ALL session clients including sender.
    /// Sender's copy carries `parent_id` for correlation.
    Broadcast(Data),
    /// Broadcast data to all session peers EXCLUDING sender. No reply to sender.
    /// Used for cursor moves.
    BroadcastExcludeSender(Data),
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Reply to sender with one payload, broadcast different data to peers.
    ReplyAndBroadcast { reply: Data, broadcast: Data },
    /// Nothing goes out. Dropped cursor writes.
    Ignore,
}

/// The participant a connection acts as, fixed at create/join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    session_id: SessionId,
    participant_id: ParticipantId,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    let mut binding: Option<Binding> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        dispatch_frame(&state, &mut socket, &mut binding, client_id, &client_tx, &text).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(bound) = binding {
        services::session::depart(&state, bound.session_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse an incoming JSON frame, dispatch to handler, apply outcome.
async fn dispatch_frame(
    state: &AppState,
    socket: &mut WebSocket,
    binding: &mut Option<Binding>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) {
    let sender_frames = process_inbound_text(state, binding, client_id, client_tx, text).await;
    for frame in sender_frames {
        let _ = send_frame(socket, &frame).await;
    }
}

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive full multi-client
/// scenarios through channels.
async fn process_inbound_text(
    state: &AppState,
    binding: &mut Option<Binding>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    let prefix = req.prefix();
    if prefix == "cursor" {
        debug!(%client_id, id = %req.id, "ws: recv cursor frame");
    } else {
        info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    let result = match prefix {
        "session" => handle_session(state, binding, client_id, client_tx, &req).await,
        "cursor" => Ok(handle_cursor(state, *binding, &req).await),
        "input" => handle_input(state, *binding, &req).await,
        "control" => handle_control(state, *binding, &req).await,
        "exercise" => handle_exercise(state, *binding, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome. Binding is re-read: create/join/leave may have changed it.
    let bound = *binding;
    match result {
        Ok(Outcome::Broadcast(data)) => {
            if let Some(b) = bound {
                // Peers get a push without parent_id (they didn't originate the request).
                let peer_frame = notification(&req, b, data.clone());
                services::session::broadcast(state, b.session_id, &peer_frame, Some(client_id)).await;
            }
            vec![req.done_with(data)]
        }
        Ok(Outcome::BroadcastExcludeSender(data)) => {
            if let Some(b) = bound {
                let frame = notification(&req, b, data);
                services::session::broadcast(state, b.session_id, &frame, Some(client_id)).await;
            }
            vec![]
        }
        Ok(Outcome::Reply(data)) => {
            vec![req.done_with(data)]
        }
        Ok(Outcome::Done) => {
            vec![req.done()]
        }
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            let sender_frame = req.done_with(reply);
            if let Some(b) = bound {
                let notif = notification(&req, b, broadcast);
                services::session::broadcast(state, b.session_id, &notif, Some(client_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::Ignore) => vec![],
        Err(err_frame) => {
            vec![err_frame]
        }
    }
}

// =============================================================================
// SESSION HANDLERS
// =============================================================================

async fn handle_session(
    state: &AppState,
    binding: &mut Option<Binding>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "create" => {
            let display_name = required_str(req, "display_name")?;
            let control_mode = optional_mode(req, "control_mode")?;
            let total_items = required_u32(req, "total_items")?;

            match services::session::create_session(
                state,
                client_id,
                client_tx.clone(),
                display_name,
                control_mode,
                total_items,
            )
            .await
            {
                Ok(membership) => {
                    rebind(state, binding, client_id, &membership).await;
                    Ok(Outcome::Reply(membership_data(&membership)))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "join" => {
            let session_id = match optional_uuid(req, "session_id")?.or(req.session_id) {
                Some(id) => id,
                None => return Err(invalid_field(req, "session_id required")),
            };
            let display_name = required_str(req, "display_name")?;
            let resume = match optional_uuid(req, "participant_id")? {
                Some(participant_id) => {
                    let Some(token) = req.data.get("token").and_then(|v| v.as_str()) else {
                        return Err(req.error_from(&SessionError::InvalidToken(participant_id)));
                    };
                    Some(Resume { participant_id, token: token.to_owned() })
                }
                None => None,
            };

            match services::session::join_session(state, session_id, client_id, client_tx.clone(), display_name, resume)
                .await
            {
                Ok(membership) => {
                    rebind(state, binding, client_id, &membership).await;
                    let joined = SessionEvent::ParticipantJoined { participant: membership.participant.clone() };
                    Ok(Outcome::ReplyAndBroadcast { reply: membership_data(&membership), broadcast: event_data(&joined) })
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "leave" => {
            let Some(old) = binding.take() else {
                return Err(req.error_from(&SessionError::NotJoined));
            };
            services::session::depart(state, old.session_id, client_id).await;
            Ok(Outcome::Done)
        }
        "get" => {
            let bound = require_binding(req, *binding)?;
            match services::session::get_session(state, bound.session_id).await {
                Ok(session) => Ok(Outcome::Reply(event_data(&SessionEvent::Snapshot { session }))),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown session op: {op}"))),
    }
}

// =============================================================================
// CURSOR HANDLER
// =============================================================================

async fn handle_cursor(state: &AppState, binding: Option<Binding>, req: &Frame) -> Outcome {
    // Silently ignore cursor moves before joining.
    let Some(bound) = binding else {
        return Outcome::Ignore;
    };
    let x = req.data.get("x").and_then(serde_json::Value::as_f64);
    let y = req.data.get("y").and_then(serde_json::Value::as_f64);
    let (Some(x), Some(y)) = (x, y) else {
        debug!(participant_id = %bound.participant_id, "cursor: missing coordinates");
        return Outcome::Ignore;
    };
    let seq = req
        .data
        .get("seq")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);

    match services::cursor::move_cursor(state, bound.session_id, bound.participant_id, x, y, seq).await {
        Ok(Some(event)) => Outcome::BroadcastExcludeSender(event_data(&event)),
        Ok(None) => Outcome::Ignore,
        Err(e) => {
            debug!(participant_id = %bound.participant_id, error = %e, "cursor: write dropped");
            Outcome::Ignore
        }
    }
}

// =============================================================================
// INPUT HANDLER
// =============================================================================

async fn handle_input(state: &AppState, binding: Option<Binding>, req: &Frame) -> Result<Outcome, Frame> {
    let bound = require_binding(req, binding)?;
    if req.op() != "update" {
        return Err(req.error(format!("unknown input op: {}", req.op())));
    }

    let value = required_str(req, "value")?;
    let item_index = required_u32(req, "item_index")?;
    let seq = optional_seq(req)?;

    match services::input::update_input(state, bound.session_id, bound.participant_id, value.to_owned(), item_index, seq)
        .await
    {
        Ok(Some(event)) => Ok(Outcome::ReplyAndBroadcast { reply: applied(true), broadcast: event_data(&event) }),
        Ok(None) => Ok(Outcome::Reply(applied(false))),
        Err(e) => Err(req.error_from(&e)),
    }
}

// =============================================================================
// CONTROL HANDLERS
// =============================================================================

async fn handle_control(state: &AppState, binding: Option<Binding>, req: &Frame) -> Result<Outcome, Frame> {
    let bound = require_binding(req, binding)?;
    let claimed_host = required_uuid(req, "host_participant_id")?;

    let result = match req.op() {
        "set_mode" => {
            let Some(mode) = optional_mode(req, "mode")? else {
                return Err(invalid_field(req, "mode required"));
            };
            let controlled_by = optional_uuid(req, "controlled_by")?;
            services::control::set_mode(state, bound.session_id, bound.participant_id, claimed_host, mode, controlled_by)
                .await
        }
        "grant" => {
            let target = required_uuid(req, "target_participant_id")?;
            services::control::grant(state, bound.session_id, bound.participant_id, claimed_host, target).await
        }
        op => return Err(req.error(format!("unknown control op: {op}"))),
    };

    match result {
        Ok(control) => Ok(Outcome::Broadcast(event_data(&SessionEvent::ControlChanged { control }))),
        Err(e) => Err(req.error_from(&e)),
    }
}

// =============================================================================
// EXERCISE HANDLER
// =============================================================================

async fn handle_exercise(state: &AppState, binding: Option<Binding>, req: &Frame) -> Result<Outcome, Frame> {
    let bound = require_binding(req, binding)?;
    if req.op() != "set_item" {
        return Err(req.error(format!("unknown exercise op: {}", req.op())));
    }
    let item_index = required_u32(req, "item_index")?;

    match services::exercise::set_item(state, bound.session_id, bound.participant_id, item_index).await {
        Ok(Some(event)) => Ok(Outcome::Broadcast(event_data(&event))),
        Ok(None) => Ok(Outcome::Done),
        Err(e) => Err(req.error_from(&e)),
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

fn invalid_field(req: &Frame, message: impl Into<String>) -> Frame {
    req.error_from(&SessionError::InvalidField(message.into()))
}

fn require_binding(req: &Frame, binding: Option<Binding>) -> Result<Binding, Frame> {
    binding.ok_or_else(|| req.error_from(&SessionError::NotJoined))
}

fn required_str<'a>(req: &'a Frame, key: &str) -> Result<&'a str, Frame> {
    req.data
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid_field(req, format!("{key} required")))
}

fn required_uuid(req: &Frame, key: &str) -> Result<Uuid, Frame> {
    optional_uuid(req, key)?.ok_or_else(|| invalid_field(req, format!("{key} required")))
}

/// Missing or null is `None`; anything else must be a UUID string.
fn optional_uuid(req: &Frame, key: &str) -> Result<Option<Uuid>, Frame> {
    match req.data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(|s| s.parse().ok())
            .map(Some)
            .ok_or_else(|| invalid_field(req, format!("{key} must be a UUID"))),
    }
}

fn required_u32(req: &Frame, key: &str) -> Result<u32, Frame> {
    req.data
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid_field(req, format!("{key} must be a non-negative integer")))
}

fn optional_seq(req: &Frame) -> Result<u64, Frame> {
    match req.data.get("seq") {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| invalid_field(req, "seq must be a non-negative integer")),
    }
}

fn optional_mode(req: &Frame, key: &str) -> Result<Option<ControlMode>, Frame> {
    match req.data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(ControlMode::parse)
            .map(Some)
            .ok_or_else(|| invalid_field(req, format!("{key} must be free, single, or host_only"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn bind(membership: &Membership) -> Binding {
    Binding { session_id: membership.session_id, participant_id: membership.participant.participant_id }
}

/// Point the connection at a new membership. The old binding is released
/// only here, after create/join succeeded, so a failed request leaves it intact.
async fn rebind(state: &AppState, binding: &mut Option<Binding>, client_id: Uuid, membership: &Membership) {
    let next = bind(membership);
    match binding.replace(next) {
        Some(old) if old.session_id != next.session_id => {
            services::session::depart(state, old.session_id, client_id).await;
        }
        Some(old) if old.participant_id != next.participant_id => {
            services::session::release_previous(state, old.session_id, old.participant_id).await;
        }
        _ => {}
    }
}

/// Reply payload for create/join: the snapshot plus the caller's identity.
fn membership_data(membership: &Membership) -> Data {
    let mut data = event_data(&SessionEvent::Snapshot { session: membership.snapshot.clone() });
    data.insert("session_id".into(), serde_json::json!(membership.session_id));
    data.insert("participant_id".into(), serde_json::json!(membership.participant.participant_id));
    data.insert("token".into(), serde_json::json!(membership.token));
    data
}

fn applied(applied: bool) -> Data {
    let mut data = Data::new();
    data.insert("applied".into(), serde_json::json!(applied));
    data
}

/// Push frame for peers, stamped with the acting participant.
fn notification(req: &Frame, bound: Binding, data: Data) -> Frame {
    Frame::request(&req.syscall, data)
        .with_session_id(bound.session_id)
        .with_from(bound.participant_id.to_string())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.syscall.starts_with("cursor:") {
        debug!(id = %frame.id, "ws: send cursor frame");
    } else if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
