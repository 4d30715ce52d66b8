//! Per-message handling for received buffers.

use log::{debug, warn};
use shared::{disconnect_notice, Message, MessageKind};

use crate::error::{Result, ServerError};
use crate::events::{EventSender, GameEvent, MOVE_DISPLACEMENT, SHOT_DISPLACEMENT};
use crate::registry::{SessionId, SessionRegistry};

/// What a dispatched message resulted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Sender is no longer registered; the message was ignored
    Ignored,
    /// Move relayed to `delivered` other sessions
    Relayed { delivered: usize },
    /// Sender left after its disconnect was relayed
    Disconnected { delivered: usize },
    /// Shot forwarded to its target, if the target is still connected
    Targeted { target: SessionId, delivered: bool },
}

/// Handles one buffer received from `sender`.
///
/// The buffer is relayed byte for byte; the server never re-encodes client
/// payloads. Send failures only schedule the affected peer for removal.
/// Decode errors are returned so the caller can log them; the sender stays
/// connected either way.
pub fn dispatch(
    registry: &mut SessionRegistry,
    events: &EventSender,
    sender: SessionId,
    payload: &[u8],
) -> Result<Dispatched> {
    if !registry.touch(sender) {
        debug!("Dropping message from departed session {}", sender);
        return Ok(Dispatched::Ignored);
    }

    let message = Message::decode(payload)?;

    match message.kind()? {
        MessageKind::Move => {
            debug!("Move from session {}", sender);
            let delivered = registry.broadcast(payload, Some(sender));
            events.emit(GameEvent::displaced(MOVE_DISPLACEMENT));
            Ok(Dispatched::Relayed { delivered })
        }
        MessageKind::Disconnect => {
            debug!("Disconnect from session {}", sender);
            let delivered = registry.broadcast(payload, Some(sender));
            registry.remove(sender)?;
            Ok(Dispatched::Disconnected { delivered })
        }
        MessageKind::Shot => {
            let target = message.shot_target()?;
            debug!("Shot from session {} at session {}", sender, target);
            events.emit(GameEvent::displaced(SHOT_DISPLACEMENT));

            let delivered = match registry.send_to(target, payload) {
                Ok(()) => true,
                Err(ServerError::SessionNotFound(_)) => false,
                Err(e) => {
                    warn!("{}", e);
                    false
                }
            };
            Ok(Dispatched::Targeted { target, delivered })
        }
    }
}

/// Removes a session whose peer closed the connection.
///
/// The remaining sessions are told with a disconnect notice. Returns false,
/// without notifying anyone, if the session was already gone.
pub fn peer_closed(registry: &mut SessionRegistry, id: SessionId) -> bool {
    if registry.remove(id).is_err() {
        return false;
    }

    registry.broadcast(&disconnect_notice(id), None);
    true
}
