// Live subscription layer.
//
// Wraps store change notifications into a per-document feed. The first
// event always reports current existence: `Data(None)` when the document
// does not exist yet. Attachment liveness is guarded by a 2500 ms
// first-result deadline with exactly one reattach attempt, and a
// generation counter discards notifications from superseded attachments
// so a reattach racing a late event never delivers out of order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::{DocPath, DocStore};

/// How long an attachment may stay silent before it is torn down.
pub const FIRST_RESULT_TIMEOUT_MS: u64 = 2500;
/// Bounded reattachment: one extra attempt, then the feed stays put.
pub const MAX_REATTACH: u32 = 1;

/// One delivery to the feed consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Current document body; `None` means it does not exist.
    Data(Option<Value>),
    /// Stream-level failure, surfaced instead of silently dropping.
    Error(String),
}

/// A live feed on one document. Dropping it unsubscribes.
pub struct DocFeed {
    events: mpsc::UnboundedReceiver<FeedEvent>,
    task: JoinHandle<()>,
}

impl DocFeed {
    /// Next event, or `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

impl Drop for DocFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Attach a feed to `path`.
pub fn subscribe(store: Arc<DocStore>, path: DocPath) -> DocFeed {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_feed(store, path, tx));
    DocFeed { events: rx, task }
}

// ── State machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Attaching,
    Live,
    Reattaching,
    Closed,
}

#[derive(Debug)]
pub(crate) enum Input {
    Notification { generation: u64, body: Option<Value> },
    StreamError { generation: u64, message: String },
    DeadlineElapsed { generation: u64 },
    Unsubscribed,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Effect {
    Deliver(Option<Value>),
    DeliverError(String),
    Reattach { generation: u64 },
    Ignore,
    Close,
}

/// Pure attachment state machine; the async driver feeds it inputs and
/// executes its effects.
pub(crate) struct FeedMachine {
    phase: Phase,
    generation: u64,
    reattaches: u32,
}

impl FeedMachine {
    pub(crate) fn new() -> Self {
        Self { phase: Phase::Attaching, generation: 1, reattaches: 0 }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// The driver finished re-subscribing after a `Reattach` effect.
    pub(crate) fn attached(&mut self) {
        if self.phase == Phase::Reattaching {
            self.phase = Phase::Attaching;
        }
    }

    pub(crate) fn on_input(&mut self, input: Input) -> Effect {
        if self.phase == Phase::Closed {
            return Effect::Ignore;
        }

        match input {
            Input::Notification { generation, body } if generation == self.generation => {
                self.phase = Phase::Live;
                Effect::Deliver(body)
            }
            Input::Notification { .. } => Effect::Ignore,
            Input::StreamError { generation, message } if generation == self.generation => {
                Effect::DeliverError(message)
            }
            Input::StreamError { .. } => Effect::Ignore,
            Input::DeadlineElapsed { generation }
                if generation == self.generation && self.phase == Phase::Attaching =>
            {
                if self.reattaches < MAX_REATTACH {
                    self.reattaches += 1;
                    self.generation += 1;
                    self.phase = Phase::Reattaching;
                    Effect::Reattach { generation: self.generation }
                } else {
                    Effect::Ignore
                }
            }
            Input::DeadlineElapsed { .. } => Effect::Ignore,
            Input::Unsubscribed => {
                self.phase = Phase::Closed;
                Effect::Close
            }
        }
    }
}

// ── Driver ───────────────────────────────────────────────────────────

enum Step {
    Continue,
    Reattach,
    Stop,
}

fn apply_effect(effect: Effect, tx: &mpsc::UnboundedSender<FeedEvent>) -> Step {
    match effect {
        Effect::Deliver(body) => {
            if tx.send(FeedEvent::Data(body)).is_err() {
                return Step::Stop;
            }
            Step::Continue
        }
        Effect::DeliverError(message) => {
            if tx.send(FeedEvent::Error(message)).is_err() {
                return Step::Stop;
            }
            Step::Continue
        }
        Effect::Reattach { .. } => Step::Reattach,
        Effect::Ignore => Step::Continue,
        Effect::Close => Step::Stop,
    }
}

async fn run_feed(store: Arc<DocStore>, path: DocPath, tx: mpsc::UnboundedSender<FeedEvent>) {
    let mut machine = FeedMachine::new();

    'attach: loop {
        machine.attached();
        let generation = machine.generation();
        let mut changes = store.subscribe(&path);

        let deadline = tokio::time::sleep(Duration::from_millis(FIRST_RESULT_TIMEOUT_MS));
        tokio::pin!(deadline);
        let mut deadline_armed = true;

        // The initial snapshot is the first notification: it reports
        // existence (or not) of the document at attach time.
        let initial = match store.get(&path) {
            Ok(body) => Input::Notification { generation, body },
            Err(error) => Input::StreamError { generation, message: error.to_string() },
        };
        match apply_effect(machine.on_input(initial), &tx) {
            Step::Continue => {}
            Step::Reattach => continue 'attach,
            Step::Stop => return,
        }

        loop {
            tokio::select! {
                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    let effect = machine.on_input(Input::DeadlineElapsed { generation });
                    match apply_effect(effect, &tx) {
                        Step::Continue => {}
                        Step::Reattach => continue 'attach,
                        Step::Stop => return,
                    }
                }
                event = changes.recv() => {
                    let input = match event {
                        Ok(change) => Input::Notification {
                            generation,
                            body: Some(change.body),
                        },
                        // Lagged: resynchronize from a fresh snapshot.
                        Err(RecvError::Lagged(_)) => match store.get(&path) {
                            Ok(body) => Input::Notification { generation, body },
                            Err(error) => Input::StreamError {
                                generation,
                                message: error.to_string(),
                            },
                        },
                        Err(RecvError::Closed) => Input::StreamError {
                            generation,
                            message: "change stream closed".to_string(),
                        },
                    };
                    let closed = matches!(
                        &input,
                        Input::StreamError { message, .. } if message == "change stream closed"
                    );
                    match apply_effect(machine.on_input(input), &tx) {
                        Step::Continue if closed => return,
                        Step::Continue => {}
                        Step::Reattach => continue 'attach,
                        Step::Stop => return,
                    }
                }
            }
        }
    }
}
