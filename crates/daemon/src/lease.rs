// Lease-guarded writes to the live control state.
//
// The live-state document is the single point of mutual exclusion per
// session. A lease is TTL-driven only: every successful write restamps
// `controller_lease_until = now + 60s`, and an expired lease is taken
// over by whichever contender's transaction commits first. The same
// controller id always renews, even past expiry, so a controller never
// locks itself out after its own lease lapses.

use chrono::{DateTime, Utc};
use serde_json::Value;

use plenum_common::error::{PollError, PollResult};
use plenum_common::question::Question;
use plenum_common::types::{
    lease_until, make_round_id, AnswerMode, LiveState, LiveStatus,
};

use crate::store::{Decision, DocPath, DocStore};

/// Fields a controller action wants changed on the live state.
/// `question: Some(None)` clears the stored question.
#[derive(Debug, Clone, Default)]
pub struct LivePatch {
    pub status: Option<LiveStatus>,
    pub mode: Option<AnswerMode>,
    pub round_id: Option<String>,
    pub question: Option<Option<Question>>,
}

impl LivePatch {
    fn apply(self, state: &mut LiveState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(mode) = self.mode {
            state.mode = Some(mode);
        }
        if let Some(round_id) = self.round_id {
            state.round_id = Some(round_id);
        }
        if let Some(question) = self.question {
            state.question = question;
        }
    }
}

/// Merge `patch` into the session's live state under the lease rules.
///
/// One atomic read-check-write: fails with `LeaseConflict` — and writes
/// nothing — iff the recorded lease is unexpired and held by a different
/// controller id. Unleased, expired, or self-held leases all renew.
pub fn acquire_or_renew(
    store: &DocStore,
    session_id: &str,
    controller_id: &str,
    patch: LivePatch,
    now: DateTime<Utc>,
) -> PollResult<LiveState> {
    let path = DocPath::live_state(session_id);
    store.transform(&path, now, |current| {
        let body = current
            .ok_or_else(|| PollError::NotFound(format!("live state for session `{session_id}`")))?;
        let mut state: LiveState = serde_json::from_value(body)
            .map_err(|e| PollError::Malformed(format!("live state for `{session_id}`: {e}")))?;

        if state.lease_active_at(now) {
            if let Some(holder) = state.controller_id.as_deref() {
                if holder != controller_id {
                    return Err(PollError::LeaseConflict {
                        holder: holder.to_string(),
                        until: state
                            .controller_lease_until
                            .unwrap_or(now),
                    });
                }
            }
        }

        patch.apply(&mut state);
        state.controller_id = Some(controller_id.to_string());
        state.controller_ts = Some(now);
        state.controller_lease_until = Some(lease_until(now));

        let body = serde_json::to_value(&state).map_err(|e| PollError::Store(e.to_string()))?;
        Ok(Decision::Write(body, state))
    })
}

/// Set the live status.
pub fn set_status(
    store: &DocStore,
    session_id: &str,
    controller_id: &str,
    status: LiveStatus,
    now: DateTime<Utc>,
) -> PollResult<LiveStatus> {
    let patch = LivePatch { status: Some(status), ..LivePatch::default() };
    acquire_or_renew(store, session_id, controller_id, patch, now)?;
    Ok(status)
}

/// Start a fresh round with the current question and mode.
pub fn reset_round(
    store: &DocStore,
    session_id: &str,
    controller_id: &str,
    now: DateTime<Utc>,
) -> PollResult<String> {
    let round_id = make_round_id(now);
    let patch = LivePatch {
        status: Some(LiveStatus::Collect),
        round_id: Some(round_id.clone()),
        ..LivePatch::default()
    };
    acquire_or_renew(store, session_id, controller_id, patch, now)?;
    Ok(round_id)
}

/// Stage a question without opening a round.
pub fn set_question(
    store: &DocStore,
    session_id: &str,
    controller_id: &str,
    mode: AnswerMode,
    raw_question: Option<&Value>,
    now: DateTime<Utc>,
) -> PollResult<AnswerMode> {
    let question = Question::normalize(mode, raw_question)?;
    let patch =
        LivePatch { mode: Some(mode), question: Some(question), ..LivePatch::default() };
    acquire_or_renew(store, session_id, controller_id, patch, now)?;
    Ok(mode)
}

/// Stage a question and open a fresh collecting round in one write.
pub fn start_question(
    store: &DocStore,
    session_id: &str,
    controller_id: &str,
    mode: AnswerMode,
    raw_question: Option<&Value>,
    now: DateTime<Utc>,
) -> PollResult<String> {
    let question = Question::normalize(mode, raw_question)?;
    let round_id = make_round_id(now);
    let patch = LivePatch {
        status: Some(LiveStatus::Collect),
        mode: Some(mode),
        round_id: Some(round_id.clone()),
        question: Some(question),
    };
    acquire_or_renew(store, session_id, controller_id, patch, now)?;
    Ok(round_id)
}
