//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::EventPipeline;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Registered push connections
    pub connections: usize,
}

/// Readiness check response with tier status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Tier statuses, keyed by tier name
    pub dependencies: BTreeMap<String, DependencyStatus>,
}

/// Individual tier status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Tier is reachable
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Router with `/health` and `/ready`
pub fn routes(pipeline: EventPipeline) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(readiness))
        .with_state(pipeline)
}

/// Liveness probe
///
/// Always returns 200 OK while the process is serving.
pub async fn health(State(pipeline): State<EventPipeline>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: pipeline.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        connections: pipeline.hub().count().await,
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe
///
/// The hot cache is not required for readiness: records fall back to the
/// persistent store while it is down. The persistent store is.
pub async fn readiness(State(pipeline): State<EventPipeline>) -> impl IntoResponse {
    let mut dependencies = BTreeMap::new();

    let cache = match pipeline.hot_cache().len().await {
        Ok(staged) => DependencyStatus {
            healthy: true,
            message: Some(format!("{staged} record(s) staged")),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Hot cache health check failed");
            DependencyStatus {
                healthy: false,
                message: Some(e.to_string()),
            }
        }
    };
    dependencies.insert("hot_cache".to_string(), cache);

    let store = match pipeline.store().count().await {
        Ok(_) => DependencyStatus {
            healthy: true,
            message: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "Persistent store health check failed");
            DependencyStatus {
                healthy: false,
                message: Some(e.to_string()),
            }
        }
    };
    let ready = store.healthy;
    dependencies.insert("store".to_string(), store);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let response = ReadinessResponse {
        ready,
        service: pipeline.config().service.name.clone(),
        dependencies,
    };

    (status, Json(response))
}
