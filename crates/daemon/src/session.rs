// Controller session lifecycle.
//
// Starting a session supersedes the owner's previous one in a single
// batch: end the old session, deactivate its join code, create the new
// session + join code, overwrite the owner pointer, and seed the live
// state with the caller's lease. There is never more than one live
// pointer per owner.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use plenum_common::error::{PollError, PollResult};
use plenum_common::types::{
    ActiveSessionInfo, JoinCodeRecord, LiveState, OwnerPointer, SessionRecord, SessionStatus,
};

use crate::auth::{require_owner, AuthProvider};
use crate::directory::generate_unique_join_code;
use crate::identity::ClientIdentity;
use crate::store::{DocPath, DocStore, DocWrite};

/// Options for `start_or_replace_session`.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub save_results: bool,
    pub program_id: Option<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { save_results: true, program_id: None }
    }
}

/// Start a new session for the signed-in owner, superseding any active
/// one. The caller's client identity becomes the initial controller.
pub fn start_or_replace_session(
    store: &DocStore,
    auth: &dyn AuthProvider,
    identity: &ClientIdentity,
    options: StartOptions,
    rng: &mut impl Rng,
    now: DateTime<Utc>,
) -> PollResult<ActiveSessionInfo> {
    let owner_id = require_owner(auth)?;

    let previous = read_owner_pointer(store, &owner_id)?;

    let session_id = Uuid::new_v4().to_string();
    if session_id == owner_id {
        return Err(PollError::InvalidInput(
            "generated session id collided with the owner id".into(),
        ));
    }
    let join_code = generate_unique_join_code(store, rng)?;

    let mut writes = Vec::new();
    if let Some(pointer) = &previous {
        if let Some(old_session) = &pointer.active_session_id {
            writes.push(DocWrite::merge(
                DocPath::session(old_session),
                serde_json::json!({
                    "status": SessionStatus::Ended,
                    "ended_at": now,
                    "updated_at": now,
                }),
            ));
        }
        if let Some(old_code) = &pointer.active_join_code {
            writes.push(DocWrite::merge(
                DocPath::join_code(old_code),
                serde_json::json!({ "active": false }),
            ));
        }
    }

    let session = SessionRecord {
        session_id: session_id.clone(),
        owner_id: owner_id.clone(),
        status: SessionStatus::Active,
        join_code: join_code.clone(),
        save_results: options.save_results,
        program_id: options.program_id,
        started_at: now,
        ended_at: None,
        updated_at: now,
    };
    writes.push(DocWrite::set(DocPath::session(&session_id), to_body(&session)?));

    let code_record = JoinCodeRecord {
        session_id: session_id.clone(),
        owner_id: Some(owner_id.clone()),
        active: true,
        created_at: now,
    };
    writes.push(DocWrite::set(DocPath::join_code(&join_code), to_body(&code_record)?));

    let pointer = OwnerPointer {
        active_session_id: Some(session_id.clone()),
        active_join_code: Some(join_code.clone()),
        updated_at: now,
    };
    writes.push(DocWrite::set(DocPath::owner(&owner_id), to_body(&pointer)?));

    let live = LiveState::seeded(&session_id, &identity.client_id, now);
    writes.push(DocWrite::set(DocPath::live_state(&session_id), to_body(&live)?));

    store.commit_batch(writes, now)?;
    Ok(ActiveSessionInfo { owner_id, session_id, join_code })
}

/// End the owner's session: mark it ended, deactivate its join code,
/// clear the owner pointer. The session document itself is kept.
pub fn end_session(
    store: &DocStore,
    auth: &dyn AuthProvider,
    session_id: &str,
    now: DateTime<Utc>,
) -> PollResult<()> {
    let owner_id = require_owner(auth)?;
    if session_id.is_empty() {
        return Err(PollError::InvalidInput("missing session id".into()));
    }

    let body = store
        .get(&DocPath::session(session_id))?
        .ok_or_else(|| PollError::NotFound(format!("session `{session_id}`")))?;
    let session: SessionRecord = serde_json::from_value(body)
        .map_err(|e| PollError::Malformed(format!("session `{session_id}`: {e}")))?;
    if session.owner_id != owner_id {
        return Err(PollError::PermissionDenied(format!(
            "session `{session_id}` belongs to another owner"
        )));
    }

    let mut writes = vec![DocWrite::merge(
        DocPath::session(session_id),
        serde_json::json!({
            "status": SessionStatus::Ended,
            "ended_at": now,
            "updated_at": now,
        }),
    )];
    if !session.join_code.is_empty() {
        writes.push(DocWrite::merge(
            DocPath::join_code(&session.join_code.to_uppercase()),
            serde_json::json!({ "active": false }),
        ));
    }
    let cleared = OwnerPointer { active_session_id: None, active_join_code: None, updated_at: now };
    writes.push(DocWrite::set(DocPath::owner(&owner_id), to_body(&cleared)?));

    store.commit_batch(writes, now)?;
    Ok(())
}

fn read_owner_pointer(store: &DocStore, owner_id: &str) -> PollResult<Option<OwnerPointer>> {
    let Some(body) = store.get(&DocPath::owner(owner_id))? else {
        return Ok(None);
    };
    serde_json::from_value(body)
        .map(Some)
        .map_err(|e| PollError::Malformed(format!("owner pointer for `{owner_id}`: {e}")))
}

fn to_body<T: serde::Serialize>(record: &T) -> PollResult<serde_json::Value> {
    serde_json::to_value(record).map_err(|e| PollError::Store(e.to_string()))
}
