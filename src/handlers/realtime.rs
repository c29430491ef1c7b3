use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::entitlement::Entitlement;
use crate::auth::permission;
use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    /// Bearer token; browsers cannot set headers on WebSocket upgrades
    pub token: String,
    /// Restrict the stream to a single branch
    pub branch_id: Option<Uuid>,
}

/// GET /realtime/ws?token=...[&branch_id=...]
///
/// Authorization happens before the upgrade: an invalid token, a
/// missing subscribe permission, or an empty branch entitlement all
/// reject the handshake.
pub async fn realtime_ws(
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServiceError> {
    let claims = state
        .auth
        .validate_token(&params.token)
        .map_err(|_| ServiceError::Unauthorized("Invalid realtime token".to_string()))?;
    let user = state
        .auth
        .user_from_claims(claims)
        .map_err(|_| ServiceError::Unauthorized("Invalid realtime token".to_string()))?;

    if !user.is_admin() && !user.has_permission(permission::REALTIME_SUBSCRIBE) {
        return Err(ServiceError::Forbidden(
            "Missing realtime subscribe permission".to_string(),
        ));
    }

    let entitlement = state.services.gate.entitled_branches(&user).await?;
    if entitlement.is_empty() {
        return Err(ServiceError::Forbidden(
            "No branch entitlement for realtime subscription".to_string(),
        ));
    }

    if let Some(branch_id) = params.branch_id {
        if !entitlement.allows(branch_id) {
            return Err(ServiceError::Forbidden(format!(
                "No access to branch {}",
                branch_id
            )));
        }
    }

    let user_id = user.user_id;
    let rx = state.broadcaster.subscribe();
    info!(user_id = %user_id, branch_id = ?params.branch_id, "Realtime subscriber connected");

    Ok(ws.on_upgrade(move |socket| {
        stream_events(socket, rx, entitlement, params.branch_id, user_id)
    }))
}

/// Pumps broadcast frames to one subscriber, filtered by entitlement.
///
/// Frames dropped due to lag are skipped silently; delivery is
/// at-most-once and clients refetch on reconnect.
async fn stream_events(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<crate::events::EventEnvelope>,
    entitlement: Entitlement,
    branch_filter: Option<Uuid>,
    user_id: Uuid,
) {
    loop {
        tokio::select! {
            frame = rx.recv() => {
                let envelope = match frame {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(user_id = %user_id, skipped = skipped, "Realtime subscriber lagged, frames dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                if !frame_visible(envelope.branch_id, branch_filter, &entitlement) {
                    continue;
                }

                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize realtime frame");
                        continue;
                    }
                };

                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {
                        // Inbound application messages are ignored; the
                        // stream is one-way.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!(user_id = %user_id, "Realtime subscriber disconnected");
}

/// A frame without a branch is system-wide and reaches every
/// subscriber; branch-scoped frames pass the optional filter and the
/// subscriber's entitlement.
fn frame_visible(
    frame_branch: Option<Uuid>,
    branch_filter: Option<Uuid>,
    entitlement: &Entitlement,
) -> bool {
    match frame_branch {
        None => true,
        Some(branch_id) => {
            if let Some(filter) = branch_filter {
                if branch_id != filter {
                    return false;
                }
            }
            entitlement.allows(branch_id)
        }
    }
}
