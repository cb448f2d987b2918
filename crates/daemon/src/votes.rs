// Vote ledger: at-most-one accepted vote per (session, round, client).
//
// The create-if-absent transaction is the correctness mechanism, not
// client-side debouncing: concurrent duplicates race inside the store
// and exactly one creates the document. Resubmission is reported as
// `already = true`, never as an error.

use chrono::{DateTime, Utc};
use serde_json::Value;

use plenum_common::error::{PollError, PollResult};
use plenum_common::types::{is_valid_client_id, AnswerMode, SubmitReceipt, VoteRecord};

use crate::store::{DocPath, DocStore};

/// Submit one vote for the current round.
///
/// `round_id = None` means the participant has no round yet (waiting for
/// the controller to start one) and fails with `MissingRound` before any
/// write. The mode tag is validated against the four answer modes.
pub fn submit_vote_once(
    store: &DocStore,
    session_id: &str,
    round_id: Option<&str>,
    mode: &str,
    value: Value,
    client_id: &str,
    now: DateTime<Utc>,
) -> PollResult<SubmitReceipt> {
    if session_id.is_empty() {
        return Err(PollError::InvalidInput("missing session id".into()));
    }
    let round_id = match round_id {
        Some(round) if !round.is_empty() => round,
        _ => return Err(PollError::MissingRound),
    };
    let mode =
        AnswerMode::parse(mode).ok_or_else(|| PollError::InvalidMode(mode.to_string()))?;
    if !is_valid_client_id(client_id) {
        return Err(PollError::InvalidInput(format!("invalid client id `{client_id}`")));
    }

    let record = VoteRecord {
        client_id: client_id.to_string(),
        mode: Some(mode),
        value,
        created_at: now,
    };
    let body = serde_json::to_value(&record).map_err(|e| PollError::Store(e.to_string()))?;

    let created =
        store.create_if_absent(&DocPath::vote(session_id, round_id, client_id), body, now)?;
    Ok(SubmitReceipt { ok: true, already: !created })
}
