//! Audit record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::integrity;
use crate::error::{Error, Result};

/// Actor id recorded for system or anonymous actions
pub const ANONYMOUS_ACTOR: i64 = 0;

/// State-changing action captured by an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    /// Resource created
    Create,
    /// Resource modified
    Update,
    /// Resource removed
    Delete,
    /// Session started
    Login,
    /// Session ended
    Logout,
}

impl AuditAction {
    /// Map a state-changing HTTP method to an action
    ///
    /// Returns `None` for read-only methods.
    #[must_use]
    pub fn from_method(method: &http::Method) -> Option<Self> {
        match *method {
            http::Method::POST => Some(Self::Create),
            http::Method::PUT | http::Method::PATCH => Some(Self::Update),
            http::Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    /// Uppercase verb, as used in cache keys and digests
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "LOGIN" => Ok(Self::Login),
            "LOGOUT" => Ok(Self::Logout),
            other => Err(Error::Validation(format!("unknown audit action '{other}'"))),
        }
    }
}

/// One state-changing action, sealed with an integrity digest
///
/// Records are append-only: there are no mutators, and the digest covers
/// actor, action, resource, resource id, origin, client and timestamp.
/// Use [`AuditBuilder`](super::AuditBuilder) to create them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record identifier (UUIDv7, time ordered)
    pub id: Uuid,
    /// Acting user; `0` for system or anonymous
    pub actor_id: i64,
    /// Action verb
    pub action: AuditAction,
    /// Resource name, e.g. `"students"`
    pub resource: String,
    /// Resource identifier, empty when the action has no single target
    pub resource_id: String,
    /// Structured detail blob
    pub detail: serde_json::Value,
    /// Origin address of the request
    pub origin: String,
    /// Client descriptor (user agent)
    pub client: String,
    /// Creation time, microsecond precision
    pub created_at: DateTime<Utc>,
    /// Hex-encoded BLAKE3 integrity digest
    pub digest: String,
}

impl AuditRecord {
    /// Recompute the digest from the record's fields
    #[must_use]
    pub fn compute_digest(&self) -> String {
        integrity::digest(
            self.actor_id,
            self.action,
            &self.resource,
            &self.resource_id,
            &self.origin,
            &self.client,
            &self.created_at,
        )
    }

    /// Check that the stored digest still matches the fields
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityMismatch`] if any covered field was altered
    /// after the record was built.
    pub fn verify(&self) -> Result<()> {
        let computed = self.compute_digest();
        if computed == self.digest {
            Ok(())
        } else {
            Err(Error::IntegrityMismatch {
                record_id: self.id,
                stored: self.digest.clone(),
                computed,
            })
        }
    }
}
