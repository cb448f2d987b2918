// Error taxonomy for the polling core.
//
// Validation errors are raised before any write; transactional conflicts
// surface to the caller, which decides whether to retry. A duplicate vote
// is NOT an error — it is reported as `SubmitReceipt { already: true }`.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    /// Malformed caller input: bad join code shape, bad question payload.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The join code exists but was deactivated (expired or replaced).
    #[error("join code is no longer active")]
    Inactive,

    /// A stored record is missing required fields.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// Another controller holds an unexpired lease on the live state.
    #[error("lease held by controller `{holder}` until {until}")]
    LeaseConflict { holder: String, until: DateTime<Utc> },

    /// The participant has no current round to vote in.
    #[error("no current round (waiting for the controller to start one)")]
    MissingRound,

    /// The submitted mode tag is not one of the four answer modes.
    #[error("invalid answer mode `{0}`")]
    InvalidMode(String),

    /// Join-code generation collided on every attempt.
    #[error("could not generate a unique join code after {0} attempts")]
    ExhaustedRetries(u32),

    /// The operation requires an authenticated owner.
    #[error("not signed in")]
    NotSignedIn,

    /// The caller is not the owner of the referenced session.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A store-level fault (I/O, serialization, transaction failure).
    #[error("store error: {0}")]
    Store(String),
}

pub type PollResult<T> = Result<T, PollError>;

impl PollError {
    /// Conflicts are surfaced, not retried internally; everything else in
    /// the taxonomy is a terminal caller error for the current request.
    pub fn is_lease_conflict(&self) -> bool {
        matches!(self, Self::LeaseConflict { .. })
    }
}
