//! WebRTC signaling relay.
//!
//! Offers, answers, and ICE candidates are forwarded verbatim to the single
//! connection owning the target id, tagged with the sender's identity.
//! Pure relay, at-most-once: if the target is gone the frame is dropped and
//! the caller's ICE/offer timeout handles it client-side.

use uuid::Uuid;

use crate::state::AppState;
use crate::ws::broadcast::send_to_conn;
use crate::ws::protocol::{ServerEvent, SignalEnvelope};

#[derive(Debug, Clone, Copy)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

pub fn relay(state: &AppState, from: Uuid, envelope: SignalEnvelope, kind: SignalKind) {
    let from_user_name = state
        .connections
        .get(&from)
        .and_then(|entry| entry.user_name.clone())
        .unwrap_or_default();

    let event = match kind {
        SignalKind::Offer => ServerEvent::WebrtcOffer {
            from_user_id: from,
            from_user_name,
            payload: envelope.payload,
        },
        SignalKind::Answer => ServerEvent::WebrtcAnswer {
            from_user_id: from,
            from_user_name,
            payload: envelope.payload,
        },
        SignalKind::IceCandidate => ServerEvent::WebrtcIceCandidate {
            from_user_id: from,
            from_user_name,
            payload: envelope.payload,
        },
    };

    if state.connections.contains_key(&envelope.target_user_id) {
        send_to_conn(&state.connections, envelope.target_user_id, &event);
    } else {
        tracing::debug!(
            from = %from,
            target = %envelope.target_user_id,
            "signal target gone, dropping"
        );
    }
}
