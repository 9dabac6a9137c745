//! Pipeline wiring
//!
//! [`EventPipeline`] owns the push hub, the audit recorder and the two
//! background workers, and runs them under one cancellation token.
//!
//! ```rust,ignore
//! let pipeline = EventPipeline::builder(config)
//!     .with_configured_backends()
//!     .await?
//!     .build()?;
//! pipeline.start();
//! axum::serve(listener, pipeline.router()).await?;
//! pipeline.shutdown().await;
//! ```

use axum::Router;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::{
    audit_middleware, ArchiveCatalog, ArchiveWorker, AuditLayerState, AuditRecorder, AuditStore,
    BlobStore, FlushWorker, HotCache, HotCacheBuffer, LocalBlobStore, MemoryAuditStore,
    MemoryHotCache,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::health;
use crate::hub::{self, Hub};
use crate::worker::TaskQueue;

/// Builder for [`EventPipeline`]
///
/// Tiers left unset fall back to in-process backends, and cold storage to a
/// [`LocalBlobStore`] rooted at `blob.root`.
pub struct EventPipelineBuilder {
    config: Config,
    hot_cache: Option<Arc<dyn HotCache>>,
    store: Option<Arc<dyn AuditStore>>,
    catalog: Option<Arc<dyn ArchiveCatalog>>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl EventPipelineBuilder {
    /// Use this hot cache
    pub fn hot_cache(mut self, cache: Arc<dyn HotCache>) -> Self {
        self.hot_cache = Some(cache);
        self
    }

    /// Use this persistent store
    ///
    /// A custom store needs a custom [`catalog`](Self::catalog) as well.
    pub fn store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this archive catalog
    pub fn catalog(mut self, catalog: Arc<dyn ArchiveCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use one backend as both persistent store and archive catalog
    pub fn persistence<P>(self, backend: Arc<P>) -> Self
    where
        P: AuditStore + ArchiveCatalog + 'static,
    {
        self.store(backend.clone()).catalog(backend)
    }

    /// Use this cold storage
    pub fn blob_store(mut self, blob: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob);
        self
    }

    /// Connect the backends named in configuration
    ///
    /// `[redis]` selects the Redis hot cache (`cache` feature) and
    /// `[database]` the PostgreSQL store (`database` feature). A backend
    /// marked `optional` that cannot be reached is skipped with a warning
    /// and the in-process fallback is used.
    pub async fn with_configured_backends(self) -> Result<Self> {
        let builder = self;

        #[cfg(feature = "cache")]
        let builder = builder.connect_redis().await?;
        #[cfg(not(feature = "cache"))]
        if builder.config.redis.is_some() {
            tracing::warn!("[redis] configured but the `cache` feature is disabled; ignoring");
        }

        #[cfg(feature = "database")]
        let builder = builder.connect_database().await?;
        #[cfg(not(feature = "database"))]
        if builder.config.database.is_some() {
            tracing::warn!("[database] configured but the `database` feature is disabled; ignoring");
        }

        Ok(builder)
    }

    #[cfg(feature = "cache")]
    async fn connect_redis(mut self) -> Result<Self> {
        let Some(redis) = self.config.redis.clone() else {
            return Ok(self);
        };
        match crate::cache::create_pool(&redis).await {
            Ok(pool) => {
                let index_key = self.config.audit.cache.index_key.clone();
                self.hot_cache = Some(Arc::new(crate::audit::RedisHotCache::new(pool, index_key)));
                Ok(self)
            }
            Err(e) if redis.optional => {
                tracing::warn!(error = %e, "Redis unavailable, staging in process memory");
                Ok(self)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(feature = "database")]
    async fn connect_database(self) -> Result<Self> {
        let Some(database) = self.config.database.clone() else {
            return Ok(self);
        };
        match crate::database::create_pool(&database).await {
            Ok(pool) => {
                let store = Arc::new(crate::audit::PgAuditStore::new(pool));
                store.initialize().await?;
                Ok(self.persistence(store))
            }
            Err(e) if database.optional => {
                tracing::warn!(error = %e, "Database unavailable, storing in process memory");
                Ok(self)
            }
            Err(e) => Err(e),
        }
    }

    /// Assemble the pipeline
    ///
    /// # Errors
    ///
    /// Returns a validation error if only one of store and catalog was set.
    pub fn build(self) -> Result<EventPipeline> {
        let (store, catalog): (Arc<dyn AuditStore>, Arc<dyn ArchiveCatalog>) =
            match (self.store, self.catalog) {
                (Some(store), Some(catalog)) => (store, catalog),
                (None, None) => {
                    let memory = Arc::new(MemoryAuditStore::new());
                    let store: Arc<dyn AuditStore> = memory.clone();
                    let catalog: Arc<dyn ArchiveCatalog> = memory;
                    (store, catalog)
                }
                _ => {
                    return Err(Error::Validation(
                        "store and archive catalog must be configured together".into(),
                    ))
                }
            };
        let hot_cache = self
            .hot_cache
            .unwrap_or_else(|| Arc::new(MemoryHotCache::new()));
        let blob = self
            .blob_store
            .unwrap_or_else(|| Arc::new(LocalBlobStore::new(self.config.blob.root.clone())));

        let audit = &self.config.audit;
        let recorder = AuditRecorder::new(
            Some(HotCacheBuffer::new(hot_cache.clone(), audit.cache.clone())),
            store.clone(),
            audit.fallback,
            TaskQueue::new("audit", &audit.queue),
        );
        let flush = FlushWorker::new(hot_cache.clone(), store.clone(), audit.flush.clone());
        let archive = ArchiveWorker::new(store.clone(), catalog.clone(), blob, audit.archive.clone());

        Ok(EventPipeline {
            hub: Hub::new(self.config.hub.clone()),
            config: Arc::new(self.config),
            hot_cache,
            store,
            catalog,
            recorder,
            flush,
            archive,
            cancel: CancellationToken::new(),
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

/// Outcome of [`EventPipeline::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether in-flight audit staging finished within the drain timeout
    pub drained: bool,
    /// Push connections closed
    pub closed_connections: usize,
}

/// The assembled hub and audit pipeline
#[derive(Clone)]
pub struct EventPipeline {
    config: Arc<Config>,
    hub: Hub,
    hot_cache: Arc<dyn HotCache>,
    store: Arc<dyn AuditStore>,
    catalog: Arc<dyn ArchiveCatalog>,
    recorder: AuditRecorder,
    flush: FlushWorker,
    archive: ArchiveWorker,
    cancel: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EventPipeline {
    /// Start building a pipeline
    pub fn builder(config: Config) -> EventPipelineBuilder {
        EventPipelineBuilder {
            config,
            hot_cache: None,
            store: None,
            catalog: None,
            blob_store: None,
        }
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Push hub
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Audit recorder
    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    /// Hot cache tier
    pub fn hot_cache(&self) -> &Arc<dyn HotCache> {
        &self.hot_cache
    }

    /// Persistent tier
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Archive catalog
    pub fn catalog(&self) -> &Arc<dyn ArchiveCatalog> {
        &self.catalog
    }

    /// Flush worker, for one-off runs
    pub fn flush_worker(&self) -> &FlushWorker {
        &self.flush
    }

    /// Archive worker, for one-off runs
    pub fn archive_worker(&self) -> &ArchiveWorker {
        &self.archive
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// State for [`audit_middleware`]
    pub fn audit_layer_state(&self) -> AuditLayerState {
        AuditLayerState::new(self.recorder.clone(), self.config.audit.excluded_routes.clone())
    }

    /// Push endpoint and health probes, with the audit middleware applied
    /// when auditing is enabled
    ///
    /// Application routes can be merged in before serving; the
    /// authentication layer installing [`Actor`](crate::audit::Actor) goes
    /// outside.
    pub fn router(&self) -> Router {
        let router = hub::routes(self.hub.clone()).merge(health::routes(self.clone()));
        if self.config.audit.enabled {
            router.layer(axum::middleware::from_fn_with_state(
                self.audit_layer_state(),
                audit_middleware,
            ))
        } else {
            router
        }
    }

    /// Spawn the heartbeat, flush and archive loops
    ///
    /// Calling this more than once has no effect.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        tasks.push(self.hub.spawn_heartbeat(self.cancel.child_token()));
        if self.config.audit.enabled {
            tasks.push(self.flush.spawn(self.cancel.child_token()));
            if self.config.audit.archive.enabled {
                tasks.push(self.archive.spawn(self.cancel.child_token()));
            }
        }
        tracing::info!(tasks = tasks.len(), "Event pipeline started");
    }

    /// Whether [`start`](Self::start) spawned the background loops
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && !self
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    /// Stop the loops, drain pending audit records and close every push
    /// connection
    ///
    /// Staging still in flight after `audit.queue.drain_timeout_secs` is
    /// abandoned and reported as `drained: false`.
    pub async fn shutdown(&self) -> ShutdownReport {
        tracing::info!("Event pipeline shutting down");
        self.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background loop ended abnormally");
            }
        }

        let drained = self
            .recorder
            .drain(self.config.audit.queue.drain_timeout())
            .await;
        if !drained {
            tracing::warn!(
                pending = self.recorder.queue().pending(),
                "Audit queue did not drain before timeout"
            );
        }
        let closed_connections = self.hub.close_all().await;

        tracing::info!(drained, closed_connections, "Event pipeline stopped");
        ShutdownReport {
            drained,
            closed_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryBlobStore;

    fn config() -> Config {
        let mut config = Config::default();
        config.hub.ping_interval_secs = 3600;
        config
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_stops_loops() {
        let pipeline = EventPipeline::builder(config())
            .blob_store(Arc::new(MemoryBlobStore::new()))
            .build()
            .unwrap();

        pipeline.start();
        pipeline.start();
        assert!(pipeline.is_running());
        assert_eq!(pipeline.tasks.lock().unwrap().len(), 3);

        let report = pipeline.shutdown().await;
        assert!(report.drained);
        assert!(!pipeline.is_running());
        assert!(pipeline.recorder().queue().is_closed());
    }

    #[tokio::test]
    async fn test_disabled_audit_spawns_only_heartbeat() {
        let mut config = config();
        config.audit.enabled = false;
        let pipeline = EventPipeline::builder(config)
            .blob_store(Arc::new(MemoryBlobStore::new()))
            .build()
            .unwrap();

        pipeline.start();
        assert_eq!(pipeline.tasks.lock().unwrap().len(), 1);
        pipeline.shutdown().await;
    }

    #[test]
    fn test_store_without_catalog_is_rejected() {
        let result = EventPipeline::builder(config())
            .store(Arc::new(MemoryAuditStore::new()))
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
