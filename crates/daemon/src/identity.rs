// Client identity: stable per-installation participant/controller id.
//
// The id is generated once (`c_<time36>_<hex>`, at least 8 characters)
// and persisted next to the daemon's data as an opaque JSON blob,
// together with the cached participant-session record. Operations take
// the identity as an explicit value; nothing reads it ambiently.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use plenum_common::types::{is_valid_client_id, to_base36, ParticipantSession};

/// The injected client identity value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub client_id: String,
}

/// Mint a fresh client id.
pub fn generate_client_id(now: DateTime<Utc>, rng: &mut impl Rng) -> String {
    let time_part = to_base36(now.timestamp_millis().max(0) as u64);
    let random_part: u32 = rng.gen();
    format!("c_{time_part}_{random_part:08x}")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdentityBlob {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    participant_session: Option<ParticipantSession>,
}

/// File-backed identity provider.
pub struct FileIdentityProvider {
    path: PathBuf,
}

impl FileIdentityProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted client id, minting and saving one if the blob
    /// is missing or holds an invalid id.
    pub fn load_or_create(
        &self,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Result<ClientIdentity> {
        let mut blob = self.read_blob()?;
        if let Some(id) = blob.client_id.as_deref() {
            if is_valid_client_id(id) {
                return Ok(ClientIdentity { client_id: id.to_string() });
            }
        }

        let client_id = generate_client_id(now, rng);
        blob.client_id = Some(client_id.clone());
        self.write_blob(&blob)?;
        Ok(ClientIdentity { client_id })
    }

    /// Cache the session a participant joined.
    pub fn save_participant_session(&self, session: &ParticipantSession) -> Result<()> {
        let mut blob = self.read_blob()?;
        blob.participant_session = Some(session.clone());
        self.write_blob(&blob)
    }

    /// The cached participant session, if any.
    pub fn participant_session(&self) -> Result<Option<ParticipantSession>> {
        Ok(self.read_blob()?.participant_session)
    }

    fn read_blob(&self) -> Result<IdentityBlob> {
        if !self.path.exists() {
            return Ok(IdentityBlob::default());
        }
        let raw = fs::read_to_string(&self.path).with_context(|| {
            format!("failed to read identity blob at `{}`", self.path.display())
        })?;
        // A corrupt blob is replaced rather than fatal.
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    fn write_blob(&self, blob: &IdentityBlob) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let raw = serde_json::to_string_pretty(blob).context("failed to encode identity blob")?;
        fs::write(&self.path, raw).with_context(|| {
            format!("failed to write identity blob at `{}`", self.path.display())
        })
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create identity directory `{}`", path.display()))
}
