//! Events handed to the display side of the game.
//!
//! The relay core never touches rendering state. Whatever draws the opponent
//! subscribes to these events and applies them itself.

use log::trace;
use tokio::sync::mpsc;

/// Displacement applied to the opponent when a move is relayed.
pub const MOVE_DISPLACEMENT: (i32, i32) = (25, 0);
/// Displacement applied to the opponent when a shot is relayed.
pub const SHOT_DISPLACEMENT: (i32, i32) = (0, 25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    OpponentDisplaced { dx: i32, dy: i32 },
}

impl GameEvent {
    pub fn displaced((dx, dy): (i32, i32)) -> Self {
        GameEvent::OpponentDisplaced { dx, dy }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<GameEvent>;

/// Sending side of the event channel.
///
/// Emitting never fails from the caller's point of view: with no display
/// attached the event is simply discarded.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<GameEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: GameEvent) {
        if self.tx.send(event).is_err() {
            trace!("No display attached, dropping {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitted_events_reach_the_receiver() {
        let (events, mut rx) = EventSender::channel();
        events.emit(GameEvent::displaced(MOVE_DISPLACEMENT));
        events.emit(GameEvent::displaced(SHOT_DISPLACEMENT));

        assert_eq!(
            rx.try_recv().unwrap(),
            GameEvent::OpponentDisplaced { dx: 25, dy: 0 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            GameEvent::OpponentDisplaced { dx: 0, dy: 25 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_receiver_is_silent() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        events.emit(GameEvent::displaced(MOVE_DISPLACEMENT));
    }
}
