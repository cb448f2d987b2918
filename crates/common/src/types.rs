// Core domain types shared across all plenum crates.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::question::Question;

/// Join codes are exactly this many characters.
pub const JOIN_CODE_LEN: usize = 6;
/// Alphabet join codes are drawn from.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Controller lease lifetime.
pub const LEASE_TTL_MS: i64 = 60_000;
/// Open-text aggregates keep at most this many entries.
pub const OPEN_TEXTS_CAP: usize = 500;

// ── Enums ────────────────────────────────────────────────────────────

/// How a round collects answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Multi,
    Likert,
    Open,
    Wordcloud,
}

impl AnswerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Multi => "multi",
            Self::Likert => "likert",
            Self::Open => "open",
            Self::Wordcloud => "wordcloud",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "multi" => Some(Self::Multi),
            "likert" => Some(Self::Likert),
            "open" => Some(Self::Open),
            "wordcloud" => Some(Self::Wordcloud),
            _ => None,
        }
    }
}

/// Live control-state status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Idle,
    Collect,
    Results,
    Paused,
}

impl LiveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Collect => "collect",
            Self::Results => "results",
            Self::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(Self::Idle),
            "collect" => Some(Self::Collect),
            "results" => Some(Self::Results),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Session lifecycle status. Sessions are never deleted, only superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

// ── Ids ──────────────────────────────────────────────────────────────

/// Round ids are time-derived: `r_<millis in base36>`.
pub fn make_round_id(now: DateTime<Utc>) -> String {
    format!("r_{}", to_base36(now.timestamp_millis().max(0) as u64))
}

pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Participant client ids look like `c_<time36>_<hex>` and are at least
/// 8 characters long.
pub fn is_valid_client_id(id: &str) -> bool {
    id.len() >= 8 && id.starts_with("c_")
}

// ── Documents ────────────────────────────────────────────────────────

/// A polling session. Superseded sessions keep their document with
/// `status = ended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    pub join_code: String,
    pub save_results: bool,
    #[serde(default)]
    pub program_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One per owner: the currently active session, or none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerPointer {
    #[serde(default)]
    pub active_session_id: Option<String>,
    #[serde(default)]
    pub active_join_code: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Routing record for one join code. Deactivated codes are never
/// reactivated; a replacement session gets a fresh code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCodeRecord {
    pub session_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// The singleton live control state for a session.
///
/// Pure control metadata: status, mode, round, question, and the
/// controller lease. Never contains participant answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub session_id: String,
    pub status: LiveStatus,
    #[serde(default)]
    pub mode: Option<AnswerMode>,
    #[serde(default)]
    pub round_id: Option<String>,
    #[serde(default)]
    pub question: Option<Question>,
    #[serde(default)]
    pub controller_id: Option<String>,
    #[serde(default)]
    pub controller_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub controller_lease_until: Option<DateTime<Utc>>,
}

impl LiveState {
    /// A fresh idle state, leased to `controller_id` from `now`.
    pub fn seeded(session_id: &str, controller_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: LiveStatus::Idle,
            mode: None,
            round_id: None,
            question: None,
            controller_id: Some(controller_id.to_string()),
            controller_ts: Some(now),
            controller_lease_until: Some(lease_until(now)),
        }
    }

    /// Whether the recorded lease is still enforceable at `now`.
    pub fn lease_active_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.controller_lease_until, Some(until) if until > now)
    }
}

/// Lease expiry for a lease granted or renewed at `now`.
pub fn lease_until(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::milliseconds(LEASE_TTL_MS)
}

/// One accepted vote. Write-once; the ledger never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub client_id: String,
    #[serde(default)]
    pub mode: Option<AnswerMode>,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

/// Mode-specific aggregate contents, tagged by the resolved mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AggregateData {
    Multi { counts: BTreeMap<String, u64> },
    Likert { sum: f64, count: u64 },
    Open { texts: Vec<String> },
    Wordcloud { freq: BTreeMap<String, u64> },
}

impl AggregateData {
    pub fn empty(mode: AnswerMode) -> Self {
        match mode {
            AnswerMode::Multi => Self::Multi { counts: BTreeMap::new() },
            AnswerMode::Likert => Self::Likert { sum: 0.0, count: 0 },
            AnswerMode::Open => Self::Open { texts: Vec::new() },
            AnswerMode::Wordcloud => Self::Wordcloud { freq: BTreeMap::new() },
        }
    }

    pub fn mode(&self) -> AnswerMode {
        match self {
            Self::Multi { .. } => AnswerMode::Multi,
            Self::Likert { .. } => AnswerMode::Likert,
            Self::Open { .. } => AnswerMode::Open,
            Self::Wordcloud { .. } => AnswerMode::Wordcloud,
        }
    }
}

/// The materialized summary for one round. Owned exclusively by the
/// aggregation engine; counts only grow until the round is superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    #[serde(flatten)]
    pub data: AggregateData,
    pub n: u64,
    /// Client ids already folded in. Makes the merge idempotent under
    /// at-least-once event delivery.
    #[serde(default)]
    pub seen: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRecord {
    pub fn empty(mode: AnswerMode, now: DateTime<Utc>) -> Self {
        Self { data: AggregateData::empty(mode), n: 0, seen: BTreeSet::new(), updated_at: now }
    }
}

// ── Operation results ────────────────────────────────────────────────

/// Where a join code routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoute {
    pub join_code: String,
    pub session_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// An owner's active session, as returned by `session.info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSessionInfo {
    pub owner_id: String,
    pub session_id: String,
    pub join_code: String,
}

/// Outcome of a vote submission. `already` is a success flag, not an
/// error: resubmission leaves the first vote untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub ok: bool,
    pub already: bool,
}

/// Cached participant-side record of the session a client joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSession {
    #[serde(default)]
    pub session_id: Option<String>,
    pub join_code: String,
    pub client_id: String,
    pub saved_at_ms: i64,
}
