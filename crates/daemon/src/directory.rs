// Identity & directory: join-code routing and owner pointers.
//
// Join codes are the only human-enterable handle on a session. A code
// routes while `active = true`; a deactivated code is never reactivated,
// the replacement session gets a fresh draw.

use rand::Rng;

use plenum_common::error::{PollError, PollResult};
use plenum_common::types::{
    ActiveSessionInfo, JoinCodeRecord, JoinRoute, OwnerPointer, JOIN_CODE_ALPHABET, JOIN_CODE_LEN,
};

use crate::store::{DocPath, DocStore};

/// Collision budget for join-code generation. The 36^6 space makes
/// repeated collisions a systemic symptom (draw bias), not expected load.
pub const MAX_JOIN_CODE_ATTEMPTS: u32 = 20;

/// Uppercase and validate a raw join code.
pub fn normalize_join_code(raw: &str) -> PollResult<String> {
    let code = raw.trim().to_uppercase();
    let shape_ok = code.len() == JOIN_CODE_LEN
        && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if !shape_ok {
        return Err(PollError::InvalidInput(format!(
            "join code must be {JOIN_CODE_LEN} characters over A-Z/0-9"
        )));
    }
    Ok(code)
}

/// Resolve a join code to the session it routes to.
pub fn resolve_join_code(store: &DocStore, raw: &str) -> PollResult<JoinRoute> {
    let code = normalize_join_code(raw)?;

    let body = store
        .get(&DocPath::join_code(&code))?
        .ok_or_else(|| PollError::NotFound(format!("join code `{code}`")))?;
    let record: JoinCodeRecord = serde_json::from_value(body)
        .map_err(|e| PollError::Malformed(format!("join code `{code}`: {e}")))?;

    if !record.active {
        return Err(PollError::Inactive);
    }
    if record.session_id.is_empty() {
        return Err(PollError::Malformed(format!("join code `{code}` has no session reference")));
    }

    Ok(JoinRoute { join_code: code, session_id: record.session_id, owner_id: record.owner_id })
}

/// The owner's active session/join-code pair, or `None`. Pure read.
pub fn get_active_session_info(
    store: &DocStore,
    owner_id: &str,
) -> PollResult<Option<ActiveSessionInfo>> {
    let Some(body) = store.get(&DocPath::owner(owner_id))? else {
        return Ok(None);
    };
    let pointer: OwnerPointer = serde_json::from_value(body)
        .map_err(|e| PollError::Malformed(format!("owner pointer for `{owner_id}`: {e}")))?;

    match (pointer.active_session_id, pointer.active_join_code) {
        (Some(session_id), Some(join_code)) => Ok(Some(ActiveSessionInfo {
            owner_id: owner_id.to_string(),
            session_id,
            join_code,
        })),
        _ => Ok(None),
    }
}

/// One random draw over the join-code alphabet.
pub fn random_join_code(rng: &mut impl Rng) -> String {
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Draw a code that no existing record (active or not) already uses.
pub fn generate_unique_join_code(store: &DocStore, rng: &mut impl Rng) -> PollResult<String> {
    for _ in 0..MAX_JOIN_CODE_ATTEMPTS {
        let code = random_join_code(rng);
        if store.get(&DocPath::join_code(&code))?.is_none() {
            return Ok(code);
        }
    }
    Err(PollError::ExhaustedRetries(MAX_JOIN_CODE_ATTEMPTS))
}
