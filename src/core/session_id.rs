//! Session identity.
//!
//! `SessionId` is the opaque, copyable id a viewer session is known by.
//! `SessionKey` is the liveness token behind it: the owning session holds
//! the only strong `Arc`, shared structures (the message cache) keep `Weak`
//! references, so a dropped session stops counting as a reference holder
//! without any explicit cleanup call.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex chars, for log lines and thread names.
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Liveness token for a session.
#[derive(Debug)]
pub struct SessionKey {
    id: SessionId,
}

impl SessionKey {
    pub fn new(id: SessionId) -> Arc<Self> {
        Arc::new(Self { id })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }
}
