// Authentication seam.
//
// The daemon does not authenticate anyone itself; an external provider
// supplies a stable, opaque owner id. The core only distinguishes
// signed-in from not-signed-in, and checks that before touching the
// store on any owner-scoped write path.

use std::sync::Arc;

use plenum_common::error::{PollError, PollResult};

pub trait AuthProvider: Send + Sync {
    /// The signed-in owner id, or `None`.
    fn current_owner(&self) -> Option<String>;
}

/// Fixed-identity provider: configured owner id, or signed out.
pub struct StaticAuth {
    owner: Option<String>,
}

impl StaticAuth {
    pub fn signed_in(owner: impl Into<String>) -> Self {
        Self { owner: Some(owner.into()) }
    }

    pub fn signed_out() -> Self {
        Self { owner: None }
    }

    pub fn from_config(owner: Option<String>) -> Self {
        Self { owner }
    }
}

impl AuthProvider for StaticAuth {
    fn current_owner(&self) -> Option<String> {
        self.owner.clone()
    }
}

impl<T: AuthProvider + ?Sized> AuthProvider for Arc<T> {
    fn current_owner(&self) -> Option<String> {
        (**self).current_owner()
    }
}

/// Fail with `NotSignedIn` before any write is attempted.
pub fn require_owner(auth: &dyn AuthProvider) -> PollResult<String> {
    auth.current_owner().ok_or(PollError::NotSignedIn)
}
