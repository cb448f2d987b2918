// Document store: typed paths, atomic transforms, change notifications.
//
// The contract the polling core relies on:
// - per-document atomic read-modify-write (`transform`), isolation
//   supplied by one SQLite transaction on the single writer connection
// - create-if-absent with an exact created/existed answer
// - multi-document batches committed in one transaction
// - push-based change notifications per document, plus a dedicated
//   vote-created stream feeding the aggregation trigger

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::sync::broadcast;

use plenum_common::error::{PollError, PollResult};

use super::db::PollDb;

const DOC_CHANNEL_CAPACITY: usize = 64;
const VOTE_CHANNEL_CAPACITY: usize = 1024;

// ── Paths ────────────────────────────────────────────────────────────

/// Typed reference to one document. The string form is the storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocPath {
    Owner { owner_id: String },
    Session { session_id: String },
    JoinCode { code: String },
    LiveState { session_id: String },
    Vote { session_id: String, round_id: String, client_id: String },
    Aggregate { session_id: String, round_id: String },
}

impl DocPath {
    pub fn owner(owner_id: &str) -> Self {
        Self::Owner { owner_id: owner_id.to_string() }
    }

    pub fn session(session_id: &str) -> Self {
        Self::Session { session_id: session_id.to_string() }
    }

    pub fn join_code(code: &str) -> Self {
        Self::JoinCode { code: code.to_string() }
    }

    pub fn live_state(session_id: &str) -> Self {
        Self::LiveState { session_id: session_id.to_string() }
    }

    pub fn vote(session_id: &str, round_id: &str, client_id: &str) -> Self {
        Self::Vote {
            session_id: session_id.to_string(),
            round_id: round_id.to_string(),
            client_id: client_id.to_string(),
        }
    }

    pub fn aggregate(session_id: &str, round_id: &str) -> Self {
        Self::Aggregate { session_id: session_id.to_string(), round_id: round_id.to_string() }
    }

    pub fn key(&self) -> String {
        match self {
            Self::Owner { owner_id } => format!("owners/{owner_id}"),
            Self::Session { session_id } => format!("sessions/{session_id}"),
            Self::JoinCode { code } => format!("join_codes/{code}"),
            Self::LiveState { session_id } => format!("sessions/{session_id}/state/live"),
            Self::Vote { session_id, round_id, client_id } => {
                format!("sessions/{session_id}/rounds/{round_id}/votes/{client_id}")
            }
            Self::Aggregate { session_id, round_id } => {
                format!("sessions/{session_id}/rounds/{round_id}/agg")
            }
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// A committed write to one document.
#[derive(Debug, Clone)]
pub struct DocEvent {
    pub key: String,
    pub body: Value,
}

/// Emitted once per newly created vote document.
#[derive(Debug, Clone)]
pub struct VoteCreated {
    pub session_id: String,
    pub round_id: String,
    pub client_id: String,
    pub body: Value,
}

// ── Transform decisions ──────────────────────────────────────────────

/// What an atomic transform decided to do with the document.
pub enum Decision<T> {
    /// Replace the document body and return `T` to the caller.
    Write(Value, T),
    /// Leave the document untouched and return `T`.
    Keep(T),
}

/// One entry of a multi-document batch.
pub struct DocWrite {
    pub path: DocPath,
    pub body: Value,
    /// Shallow-merge into the existing body instead of replacing it.
    pub merge: bool,
}

impl DocWrite {
    pub fn set(path: DocPath, body: Value) -> Self {
        Self { path, body, merge: false }
    }

    pub fn merge(path: DocPath, body: Value) -> Self {
        Self { path, body, merge: true }
    }
}

// ── Store ────────────────────────────────────────────────────────────

struct ChangeHub {
    doc_txs: Mutex<HashMap<String, broadcast::Sender<DocEvent>>>,
    vote_tx: broadcast::Sender<VoteCreated>,
}

impl ChangeHub {
    fn new() -> Self {
        let (vote_tx, _) = broadcast::channel(VOTE_CHANNEL_CAPACITY);
        Self { doc_txs: Mutex::new(HashMap::new()), vote_tx }
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<DocEvent> {
        let mut txs = self.doc_txs.lock().expect("change hub lock should not be poisoned");
        txs.entry(key.to_string())
            .or_insert_with(|| broadcast::channel(DOC_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, key: &str, body: &Value) {
        let txs = self.doc_txs.lock().expect("change hub lock should not be poisoned");
        if let Some(tx) = txs.get(key) {
            let _ = tx.send(DocEvent { key: key.to_string(), body: body.clone() });
        }
    }

    fn publish_vote(&self, event: VoteCreated) {
        let _ = self.vote_tx.send(event);
    }
}

/// The shared document store. Cheap to share via `Arc`; all operations
/// take `&self`.
pub struct DocStore {
    db: Mutex<PollDb>,
    hub: ChangeHub,
}

impl DocStore {
    pub fn open(path: impl AsRef<Path>) -> AnyResult<Self> {
        Ok(Self { db: Mutex::new(PollDb::open(path)?), hub: ChangeHub::new() })
    }

    pub fn open_in_memory() -> AnyResult<Self> {
        Ok(Self { db: Mutex::new(PollDb::open_in_memory()?), hub: ChangeHub::new() })
    }

    /// Read one document. `None` means it does not exist.
    pub fn get(&self, path: &DocPath) -> PollResult<Option<Value>> {
        let db = self.lock_db();
        read_document(db.connection(), &path.key())
    }

    /// Atomic read-modify-write on one document.
    ///
    /// `f` is a pure decision function from the current body to either a
    /// replacement body or "keep". Isolation comes from the enclosing
    /// SQLite transaction: concurrent transforms on the same document
    /// serialize, and exactly one of two racing writers observes the
    /// other's committed state.
    pub fn transform<T>(
        &self,
        path: &DocPath,
        now: DateTime<Utc>,
        f: impl FnOnce(Option<Value>) -> PollResult<Decision<T>>,
    ) -> PollResult<T> {
        let key = path.key();
        let (result, written) = {
            let mut db = self.lock_db();
            let tx = db
                .connection_mut()
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;

            let current = read_document(&tx, &key)?;
            match f(current)? {
                Decision::Write(body, value) => {
                    upsert_document(&tx, &key, &body, now)?;
                    tx.commit().map_err(store_err)?;
                    (value, Some(body))
                }
                Decision::Keep(value) => {
                    tx.commit().map_err(store_err)?;
                    (value, None)
                }
            }
        };

        if let Some(body) = written {
            self.hub.publish(&key, &body);
        }
        Ok(result)
    }

    /// Create the document unless it already exists. Returns whether this
    /// call created it. A created vote document additionally fires the
    /// vote-created stream.
    pub fn create_if_absent(
        &self,
        path: &DocPath,
        body: Value,
        now: DateTime<Utc>,
    ) -> PollResult<bool> {
        let published = body.clone();
        let created = self.transform(path, now, move |current| match current {
            Some(_) => Ok(Decision::Keep(false)),
            None => Ok(Decision::Write(body, true)),
        })?;

        if created {
            if let DocPath::Vote { session_id, round_id, client_id } = path {
                self.hub.publish_vote(VoteCreated {
                    session_id: session_id.clone(),
                    round_id: round_id.clone(),
                    client_id: client_id.clone(),
                    body: published,
                });
            }
        }
        Ok(created)
    }

    /// Commit several writes in one transaction. Merge entries fold into
    /// the existing body (top-level keys); set entries replace it.
    pub fn commit_batch(&self, writes: Vec<DocWrite>, now: DateTime<Utc>) -> PollResult<()> {
        let mut committed: Vec<(String, Value)> = Vec::with_capacity(writes.len());
        {
            let mut db = self.lock_db();
            let tx = db
                .connection_mut()
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(store_err)?;

            for write in writes {
                let key = write.path.key();
                let body = if write.merge {
                    match read_document(&tx, &key)? {
                        Some(existing) => merge_shallow(existing, write.body),
                        None => write.body,
                    }
                } else {
                    write.body
                };
                upsert_document(&tx, &key, &body, now)?;
                committed.push((key, body));
            }

            tx.commit().map_err(store_err)?;
        }

        for (key, body) in &committed {
            self.hub.publish(key, body);
        }
        Ok(())
    }

    /// Change notifications for one document.
    pub fn subscribe(&self, path: &DocPath) -> broadcast::Receiver<DocEvent> {
        self.hub.subscribe(&path.key())
    }

    /// The vote-created stream consumed by the aggregation trigger.
    /// Delivery to a live receiver is at-least-once per created vote.
    pub fn subscribe_votes(&self) -> broadcast::Receiver<VoteCreated> {
        self.hub.vote_tx.subscribe()
    }

    fn lock_db(&self) -> std::sync::MutexGuard<'_, PollDb> {
        self.db.lock().expect("poll db lock should not be poisoned")
    }
}

/// Shallow merge: top-level keys of `patch` overwrite `base`.
fn merge_shallow(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

fn read_document(conn: &rusqlite::Connection, key: &str) -> PollResult<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT body FROM documents WHERE path = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(store_err)?;

    match raw {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PollError::Malformed(format!("document `{key}` is not valid JSON: {e}"))),
        None => Ok(None),
    }
}

fn upsert_document(
    conn: &rusqlite::Connection,
    key: &str,
    body: &Value,
    now: DateTime<Utc>,
) -> PollResult<()> {
    let text = serde_json::to_string(body).map_err(|e| PollError::Store(e.to_string()))?;
    conn.execute(
        "INSERT INTO documents (path, body, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![key, text, now.to_rfc3339()],
    )
    .map_err(store_err)?;
    Ok(())
}

fn store_err(error: rusqlite::Error) -> PollError {
    PollError::Store(error.to_string())
}
