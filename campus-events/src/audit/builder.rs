//! Audit record construction

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use super::integrity;
use super::record::{AuditAction, AuditRecord, ANONYMOUS_ACTOR};

/// Builds sealed audit records
///
/// Construction is pure and cannot fail: a missing actor becomes
/// [`ANONYMOUS_ACTOR`], and the digest is computed before the record is
/// handed out.
///
/// # Example
///
/// ```rust,ignore
/// let record = AuditBuilder::build(
///     Some(42),
///     AuditAction::Create,
///     "students",
///     "1001",
///     json!({"name": "Ada"}),
///     "203.0.113.7",
///     "Mozilla/5.0",
/// );
/// assert!(record.verify().is_ok());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditBuilder;

impl AuditBuilder {
    /// Build a record stamped with the current time
    #[must_use]
    pub fn build(
        actor_id: Option<i64>,
        action: AuditAction,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
        detail: serde_json::Value,
        origin: impl Into<String>,
        client: impl Into<String>,
    ) -> AuditRecord {
        Self::build_at(
            actor_id,
            action,
            resource,
            resource_id,
            detail,
            origin,
            client,
            Utc::now(),
        )
    }

    /// Build a record with an explicit creation time
    ///
    /// The timestamp is truncated to microseconds, the precision the
    /// persistent store keeps, so the digest survives a round-trip.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn build_at(
        actor_id: Option<i64>,
        action: AuditAction,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
        detail: serde_json::Value,
        origin: impl Into<String>,
        client: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> AuditRecord {
        let actor_id = actor_id.unwrap_or(ANONYMOUS_ACTOR);
        let resource = resource.into();
        let resource_id = resource_id.into();
        let origin = origin.into();
        let client = client.into();
        let created_at = created_at.trunc_subsecs(6);

        let digest = integrity::digest(
            actor_id,
            action,
            &resource,
            &resource_id,
            &origin,
            &client,
            &created_at,
        );

        AuditRecord {
            id: Uuid::now_v7(),
            actor_id,
            action,
            resource,
            resource_id,
            detail,
            origin,
            client,
            created_at,
            digest,
        }
    }
}
