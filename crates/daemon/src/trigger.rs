// In-process trigger runtime for the aggregation engine.
//
// One worker task consumes the vote-created stream and invokes the
// aggregation handler per event. Delivery is at-least-once with no
// ordering across votes; the handler is idempotent, so a lagged
// receiver or a crash-and-replay never double-counts.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agg::{self, AggOutcome};
use crate::store::DocStore;

/// Handle on the running trigger worker. Aborts the task on drop.
pub struct TriggerHandle {
    task: Option<JoinHandle<()>>,
}

impl TriggerHandle {
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Start the vote trigger worker against `store`.
///
/// Subscribe before the first vote can be written, or events created in
/// the gap are only picked up on their redelivery path.
pub fn spawn_vote_trigger(store: Arc<DocStore>) -> TriggerHandle {
    let mut events = store.subscribe_votes();
    let task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    match agg::apply_vote_created(&store, &event, Utc::now()) {
                        Ok(AggOutcome::Applied) => {
                            debug!(
                                session_id = %event.session_id,
                                round_id = %event.round_id,
                                "vote aggregated"
                            );
                        }
                        Ok(AggOutcome::Duplicate) => {
                            debug!(
                                session_id = %event.session_id,
                                round_id = %event.round_id,
                                client_id = %event.client_id,
                                "vote already aggregated, redelivery ignored"
                            );
                        }
                        Ok(AggOutcome::Dropped) => {
                            warn!(
                                session_id = %event.session_id,
                                round_id = %event.round_id,
                                "vote dropped: no safe mode"
                            );
                        }
                        Err(error) => {
                            warn!(
                                ?error,
                                session_id = %event.session_id,
                                round_id = %event.round_id,
                                "vote aggregation failed"
                            );
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "vote event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    TriggerHandle { task: Some(task) }
}
