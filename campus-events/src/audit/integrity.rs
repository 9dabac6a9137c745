//! BLAKE3 integrity digests for audit records
//!
//! The digest is computed over a fixed field order, each field prefixed with
//! its byte length so that moving bytes between adjacent fields changes the
//! result. It detects after-the-fact modification; it does not authenticate
//! who produced the record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::record::{AuditAction, AuditRecord};
use crate::error::Error;

/// Compute the hex digest over the covered fields
///
/// Field order: actor, action, resource, resource id, origin, client,
/// timestamp (RFC 3339, microseconds, `Z` suffix).
#[must_use]
pub fn digest(
    actor_id: i64,
    action: AuditAction,
    resource: &str,
    resource_id: &str,
    origin: &str,
    client: &str,
    created_at: &DateTime<Utc>,
) -> String {
    let mut hasher = blake3::Hasher::new();

    let actor = actor_id.to_string();
    let timestamp = created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    for field in [
        actor.as_str(),
        action.as_str(),
        resource,
        resource_id,
        origin,
        client,
        timestamp.as_str(),
    ] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }

    hasher.finalize().to_hex().to_string()
}

/// A record whose stored digest no longer matches its fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    /// Offending record
    pub record_id: Uuid,
    /// Digest carried by the record
    pub stored: String,
    /// Digest recomputed from the record's fields
    pub computed: String,
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "record {} stored digest {} but fields hash to {}",
            self.record_id, self.stored, self.computed
        )
    }
}

/// Verify every record, returning the ones that fail
pub fn verify_all(records: &[AuditRecord]) -> Vec<IntegrityViolation> {
    records
        .iter()
        .filter_map(|record| match record.verify() {
            Ok(()) => None,
            Err(Error::IntegrityMismatch {
                record_id,
                stored,
                computed,
            }) => Some(IntegrityViolation {
                record_id,
                stored,
                computed,
            }),
            Err(_) => None,
        })
        .collect()
}
