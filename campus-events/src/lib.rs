//! # campus-events
//!
//! Real-time push hub and tiered, tamper-evident audit pipeline for the
//! campus platform.
//!
//! ## Features
//!
//! - **Push hub**: per-user WebSocket fan-out with bounded mailboxes, eviction
//!   of slow or dead connections, and heartbeat keepalive
//! - **Audit capture**: fire-and-forget recording from an axum middleware,
//!   staged in a hot cache and falling back to direct writes
//! - **Tiered storage**: periodic flush into the persistent store and
//!   archival of aged records into compressed cold-storage bundles
//! - **Integrity**: every record carries a BLAKE3 digest that is checked
//!   before a record moves to the next tier
//! - **Graceful shutdown**: background loops stop and pending records drain
//!   on SIGTERM or SIGINT
//!
//! ## Example
//!
//! ```rust,no_run
//! use campus_events::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let pipeline = EventPipeline::builder(config)
//!         .with_configured_backends()
//!         .await?
//!         .build()?;
//!
//!     pipeline
//!         .hub()
//!         .send_to_subscriber(&SubscriberId::from(42), &EventMessage::new("grade.posted", serde_json::json!({"course": 7})))
//!         .await;
//!
//!     Server::new(pipeline).serve(Router::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod observability;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod worker;

#[cfg(feature = "cache")]
pub mod cache;

#[cfg(feature = "database")]
pub mod database;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        audit_middleware, Actor, ArchiveStatus, AuditAction, AuditBuilder, AuditConfig,
        AuditRecord, AuditRecorder, RequestContext, StageOutcome,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorClass, Result};
    pub use crate::health::{health, readiness};
    pub use crate::hub::{
        ConnectionId, DeliveryReport, EventMessage, Hub, HubConfig, SubscriberId,
    };
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{EventPipeline, ShutdownReport};
    pub use crate::retry::RetryConfig;
    pub use crate::server::Server;

    pub use axum::{
        extract::State,
        routing::{delete, get, patch, post, put},
        Json, Router,
    };
}
