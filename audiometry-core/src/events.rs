//! # Session Events
//!
//! Observer hooks fired by the session. Handlers are notified synchronously
//! on the session thread; their return value never influences the test.
//! Front-ends on another thread can take a channel receiver instead.

use crate::staircase::ThresholdCriterion;
use crate::Ear;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Standard,
    Micro,
}

/// What the listener is being asked to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prompt {
    Tone,
    Catch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    TonePresented {
        frequency: u32,
        ear: Ear,
        level_db: i32,
    },
    ResponseRequired(Prompt),
    ThresholdFound {
        stage: StageKind,
        frequency: u32,
        ear: Ear,
        threshold_db: i32,
        criterion: ThresholdCriterion,
    },
    StageChanged {
        stage: StageKind,
        problem_count: usize,
    },
    Progress {
        stage: StageKind,
        completed: usize,
        total: usize,
    },
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&SessionEvent) + Send>;

#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(SubscriptionId, Handler)>,
    channels: Vec<Sender<SessionEvent>>,
    next_id: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns `false` when the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    /// Delivers every future event over an unbounded channel. The channel is
    /// dropped from the bus once its receiver goes away.
    pub fn subscribe_channel(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.channels.push(tx);
        rx
    }

    pub fn emit(&mut self, event: SessionEvent) {
        for (_, handler) in &mut self.handlers {
            handler(&event);
        }
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
