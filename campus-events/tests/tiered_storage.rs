//! End-to-end behavior of the audit tiers against the in-process backends

use std::collections::HashSet;
use std::sync::Arc;

use campus_events::audit::archive::bundle;
use campus_events::audit::{
    ArchiveConfig, ArchiveStatus, ArchiveWorker, AuditAction, AuditBuilder, AuditRecord,
    AuditStore, FlushConfig, FlushWorker, HotCache, HotCacheBuffer, HotCacheConfig,
    MemoryAuditStore, MemoryBlobStore, MemoryHotCache, StageOutcome,
};
use campus_events::config::Config;
use campus_events::pipeline::EventPipeline;
use campus_events::retry::RetryConfig;
use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

fn record(actor: i64, created_at: DateTime<Utc>) -> AuditRecord {
    AuditBuilder::build_at(
        Some(actor),
        AuditAction::Update,
        "timetable",
        actor.to_string(),
        json!({"period": actor}),
        "10.20.0.4",
        "Mozilla/5.0",
        created_at,
    )
}

fn flush_worker(cache: &Arc<MemoryHotCache>, store: &Arc<MemoryAuditStore>, min_age_secs: u64) -> FlushWorker {
    FlushWorker::new(
        cache.clone(),
        store.clone(),
        FlushConfig {
            min_age_secs,
            ..FlushConfig::default()
        },
    )
}

struct ArchiveFixture {
    store: Arc<MemoryAuditStore>,
    blob: Arc<MemoryBlobStore>,
    worker: ArchiveWorker,
    _fallback: TempDir,
}

fn archive_fixture() -> ArchiveFixture {
    archive_fixture_with_batch(ArchiveConfig::default().batch_limit)
}

fn archive_fixture_with_batch(batch_limit: usize) -> ArchiveFixture {
    let store = Arc::new(MemoryAuditStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let fallback = TempDir::new().unwrap();
    let worker = ArchiveWorker::new(
        store.clone(),
        store.clone(),
        blob.clone(),
        ArchiveConfig {
            retention_days: 7,
            fallback_dir: fallback.path().to_path_buf(),
            upload: RetryConfig::new(3, 1, 5),
            batch_limit,
            ..ArchiveConfig::default()
        },
    );
    ArchiveFixture {
        store,
        blob,
        worker,
        _fallback: fallback,
    }
}

/// Stores 10 records 10 days old and 5 records 1 day old
async fn seed_aged_and_recent(store: &MemoryAuditStore, now: DateTime<Utc>) -> (HashSet<Uuid>, HashSet<Uuid>) {
    let mut aged = HashSet::new();
    let mut recent = HashSet::new();
    for i in 0..10 {
        let r = record(i, now - chrono::Duration::days(10) + chrono::Duration::minutes(i));
        store.insert(&r).await.unwrap();
        aged.insert(r.id);
    }
    for i in 10..15 {
        let r = record(i, now - chrono::Duration::days(1) + chrono::Duration::minutes(i));
        store.insert(&r).await.unwrap();
        recent.insert(r.id);
    }
    (aged, recent)
}

#[tokio::test]
async fn flush_moves_only_records_past_threshold() {
    let cache = Arc::new(MemoryHotCache::new());
    let store = Arc::new(MemoryAuditStore::new());
    let buffer = HotCacheBuffer::new(cache.clone(), HotCacheConfig::default());
    let now = Utc::now();

    for (actor, age_hours) in [(1, 2), (2, 25), (3, 30)] {
        buffer
            .stage_at(&record(actor, now), now - chrono::Duration::hours(age_hours))
            .await
            .unwrap();
    }

    let report = flush_worker(&cache, &store, 24 * 3600)
        .run_once_at(now)
        .await
        .unwrap();

    assert_eq!(report.committed, 2);
    let persisted: HashSet<i64> = store.records().iter().map(|r| r.actor_id).collect();
    assert_eq!(persisted, HashSet::from([2, 3]));
    assert_eq!(cache.len().await.unwrap(), 1);
}

#[tokio::test]
async fn flush_rerun_after_failed_cleanup_commits_once() {
    let cache = Arc::new(MemoryHotCache::new());
    let store = Arc::new(MemoryAuditStore::new());
    let buffer = HotCacheBuffer::new(cache.clone(), HotCacheConfig::default());
    let now = Utc::now();
    buffer
        .stage_at(&record(4, now), now - chrono::Duration::hours(3))
        .await
        .unwrap();
    let worker = flush_worker(&cache, &store, 3600);

    // Persistent write succeeds, cache cleanup does not
    cache.set_fail_removes(true);
    let first = worker.run_once_at(now).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(cache.len().await.unwrap(), 1);

    cache.set_fail_removes(false);
    let second = worker.run_once_at(now).await.unwrap();
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.committed, 0);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(cache.len().await.unwrap(), 0);
}

#[tokio::test]
async fn archive_bundles_exactly_the_aged_records() {
    let f = archive_fixture();
    let now = Utc::now();
    let (aged, recent) = seed_aged_and_recent(&f.store, now).await;

    let report = f.worker.run_once_at(now).await.unwrap();
    let descriptor = report.descriptor.unwrap();
    assert_eq!(descriptor.status, ArchiveStatus::Completed);
    assert_eq!(descriptor.record_count, 10);
    assert_eq!(report.deleted, 10);

    let data = f.blob.get(&descriptor.storage_key).unwrap();
    let archived: HashSet<Uuid> = bundle::read_records(&data)
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(archived, aged);

    let remaining: HashSet<Uuid> = f.store.records().iter().map(|r| r.id).collect();
    assert_eq!(remaining, recent);
}

#[tokio::test]
async fn archive_runs_within_one_second_keep_separate_bundles() {
    let f = archive_fixture_with_batch(2);
    let now = Utc::now();
    let mut aged = HashSet::new();
    for i in 0..4 {
        let r = record(i, now - chrono::Duration::days(10) + chrono::Duration::minutes(i));
        f.store.insert(&r).await.unwrap();
        aged.insert(r.id);
    }

    let first = f.worker.run_once_at(now).await.unwrap().descriptor.unwrap();
    let second = f
        .worker
        .run_once_at(now + chrono::Duration::milliseconds(300))
        .await
        .unwrap()
        .descriptor
        .unwrap();
    assert_eq!(first.status, ArchiveStatus::Completed);
    assert_eq!(second.status, ArchiveStatus::Completed);
    assert_ne!(first.storage_key, second.storage_key);
    assert_eq!(f.store.count().await.unwrap(), 0);

    let mut recovered = HashSet::new();
    for descriptor in [&first, &second] {
        let data = f.blob.get(&descriptor.storage_key).unwrap();
        for r in bundle::read_records(&data).unwrap() {
            recovered.insert(r.id);
        }
    }
    assert_eq!(recovered, aged);
}

#[tokio::test]
async fn archive_deletes_only_after_completed_descriptor() {
    let f = archive_fixture();
    let now = Utc::now();
    seed_aged_and_recent(&f.store, now).await;

    f.worker.run_once_at(now).await.unwrap();

    let journal: Vec<String> = f
        .store
        .journal()
        .into_iter()
        .filter(|e| !e.starts_with("insert:"))
        .collect();
    assert_eq!(journal, vec!["begin:pending", "finish:completed", "delete:10"]);
}

#[tokio::test]
async fn archive_upload_failure_leaves_store_unchanged() {
    let f = archive_fixture();
    let now = Utc::now();
    seed_aged_and_recent(&f.store, now).await;
    let before = f.store.records();
    f.blob.set_failing(true);

    let report = f.worker.run_once_at(now).await.unwrap();
    let descriptor = report.descriptor.unwrap();
    assert_eq!(descriptor.status, ArchiveStatus::Failed);
    assert_eq!(report.deleted, 0);
    assert_eq!(f.store.records(), before);
    assert!(!f.store.journal().iter().any(|e| e.starts_with("delete:")));

    // The first object exhausts its retries; nothing else is attempted
    assert_eq!(f.blob.put_attempts(), 3);
}

#[test]
fn digest_is_deterministic_and_field_sensitive() {
    let created_at = Utc::now();
    let original = record(7, created_at);
    let rebuilt = record(7, created_at);
    assert_eq!(original.digest, rebuilt.digest);
    assert_eq!(original.compute_digest(), original.digest);

    let mutations: [fn(&mut AuditRecord); 7] = [
        |r: &mut AuditRecord| r.actor_id += 1,
        |r: &mut AuditRecord| r.action = AuditAction::Delete,
        |r: &mut AuditRecord| r.resource.push('s'),
        |r: &mut AuditRecord| r.resource_id.push('0'),
        |r: &mut AuditRecord| r.origin = "10.20.0.5".into(),
        |r: &mut AuditRecord| r.client = "curl/8".into(),
        |r: &mut AuditRecord| r.created_at += chrono::Duration::microseconds(1),
    ];
    for mutate in mutations {
        let mut altered = original.clone();
        mutate(&mut altered);
        assert_ne!(altered.compute_digest(), original.digest);
        assert!(altered.verify().is_err());
    }
}

#[tokio::test]
async fn staging_reports_the_tier_that_took_the_record() {
    let cache = Arc::new(MemoryHotCache::new());
    let store = Arc::new(MemoryAuditStore::new());
    let mut config = Config::default();
    config.audit.fallback = RetryConfig::new(2, 1, 1);
    let pipeline = EventPipeline::builder(config)
        .hot_cache(cache.clone())
        .persistence(store.clone())
        .blob_store(Arc::new(MemoryBlobStore::new()))
        .build()
        .unwrap();
    let recorder = pipeline.recorder();
    let r = record(9, Utc::now());

    assert!(matches!(
        recorder.stage_with_fallback(&r).await,
        StageOutcome::Cached(_)
    ));

    cache.set_available(false);
    assert_eq!(
        recorder.stage_with_fallback(&r).await,
        StageOutcome::FellBackToDirect
    );

    store.set_available(false);
    let attempts_before = store.insert_attempts();
    assert_eq!(recorder.stage_with_fallback(&r).await, StageOutcome::Dropped);
    assert_eq!(store.insert_attempts() - attempts_before, 2);
}

#[tokio::test]
async fn shutdown_drains_logged_records_into_the_cache() {
    let cache = Arc::new(MemoryHotCache::new());
    let store = Arc::new(MemoryAuditStore::new());
    let pipeline = EventPipeline::builder(Config::default())
        .hot_cache(cache.clone())
        .persistence(store.clone())
        .blob_store(Arc::new(MemoryBlobStore::new()))
        .build()
        .unwrap();
    pipeline.start();

    for actor in 0..20 {
        pipeline.recorder().log(record(actor, Utc::now()));
    }
    let report = pipeline.shutdown().await;
    assert!(report.drained);
    assert_eq!(cache.len().await.unwrap(), 20);

    let flushed = pipeline
        .flush_worker()
        .run_once_at(Utc::now() + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(flushed.committed, 20);
    assert_eq!(store.count().await.unwrap(), 20);

    // Queue is closed after shutdown
    assert!(pipeline.recorder().log(record(99, Utc::now())).is_none());
}
