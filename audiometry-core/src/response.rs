//! # Response Slot
//!
//! Single-shot resolution of "did you hear it?". The session arms the slot
//! before each presentation and then blocks on [`ResponseSlot::wait`]. The
//! front-end holds a cloneable [`Responder`] and calls
//! [`Responder::heard`] or [`Responder::not_heard`]. Only the first
//! resolution of an armed slot counts: later calls, and calls made while
//! nothing is armed, are ignored and return `false`. Real UIs double-fire.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// The three mutually exclusive outcomes of a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Response {
    Heard,
    NotHeard,
    /// Nothing arrived within the response window.
    Timeout,
}

type Pending = Arc<Mutex<Option<Sender<Response>>>>;

/// Session side of the slot.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    pending: Pending,
}

/// Front-end side of the slot. Cheap to clone; all clones share the slot.
#[derive(Debug, Clone)]
pub struct Responder {
    pending: Pending,
}

/// A slot armed for exactly one presentation.
#[derive(Debug)]
pub struct ArmedSlot {
    pending: Pending,
    receiver: Receiver<Response>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responder(&self) -> Responder {
        Responder {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Opens the slot for one presentation. Any stale, unresolved arming is
    /// discarded.
    pub fn arm(&self) -> ArmedSlot {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        *lock(&self.pending) = Some(sender);
        ArmedSlot {
            pending: Arc::clone(&self.pending),
            receiver,
        }
    }
}

impl ArmedSlot {
    /// Blocks until the slot resolves or the window elapses.
    pub fn wait(self, timeout: Duration) -> Response {
        match self.receiver.recv_timeout(timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                // Close the slot; a response that slipped in first still wins.
                let sender = lock(&self.pending).take();
                drop(sender);
                self.receiver.try_recv().unwrap_or(Response::Timeout)
            }
        }
    }
}

impl Responder {
    pub fn heard(&self) -> bool {
        self.resolve(Response::Heard)
    }

    pub fn not_heard(&self) -> bool {
        self.resolve(Response::NotHeard)
    }

    /// Resolves the armed slot. Returns `false` when nothing is armed or the
    /// slot was already resolved.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(sender) = lock(&self.pending).take() else {
            debug!(?response, "response ignored: slot not armed");
            return false;
        };
        sender.try_send(response).is_ok()
    }

    /// Whether a presentation is currently awaiting an answer.
    pub fn is_armed(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, Option<Sender<Response>>> {
    // The guarded value is a plain Option; a poisoned lock is still usable.
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_resolution_wins() {
        let slot = ResponseSlot::new();
        let responder = slot.responder();
        let armed = slot.arm();
        assert!(responder.heard());
        assert!(!responder.not_heard());
        assert!(!responder.heard());
        assert_eq!(armed.wait(Duration::from_millis(10)), Response::Heard);
    }

    #[test]
    fn unanswered_slot_times_out() {
        let slot = ResponseSlot::new();
        let responder = slot.responder();
        let armed = slot.arm();
        assert!(responder.is_armed());
        assert_eq!(armed.wait(Duration::from_millis(5)), Response::Timeout);
        assert!(!responder.is_armed());
        // Late answer after the timeout is a no-op.
        assert!(!responder.heard());
    }

    #[test]
    fn answers_while_unarmed_are_ignored() {
        let slot = ResponseSlot::new();
        let responder = slot.responder();
        assert!(!responder.heard());
        let armed = slot.arm();
        assert_eq!(armed.wait(Duration::from_millis(5)), Response::Timeout);
    }

    #[test]
    fn resolves_across_threads() {
        let slot = ResponseSlot::new();
        let responder = slot.responder();
        let armed = slot.arm();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            responder.not_heard()
        });
        assert_eq!(armed.wait(Duration::from_secs(5)), Response::NotHeard);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn rearming_discards_stale_slot() {
        let slot = ResponseSlot::new();
        let responder = slot.responder();
        let _stale = slot.arm();
        let fresh = slot.arm();
        assert!(responder.heard());
        assert_eq!(fresh.wait(Duration::from_millis(5)), Response::Heard);
    }
}
