//! Archive bundle encoding
//!
//! A bundle is three objects sharing one name. The name carries the run
//! timestamp and the run id, so two runs never address the same objects:
//!
//! - `<name>.jsonl.zst`: one JSON record per line, zstd-compressed
//! - `<name>.log`: human-readable export, one line per record
//! - `<name>.meta.json`: metadata document describing the other two

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

use crate::audit::record::AuditRecord;
use crate::error::{Error, Result};

/// Root of every archive key
pub const ARCHIVE_ROOT: &str = "logs/archived";

/// One object of a bundle, ready for upload
#[derive(Debug, Clone)]
pub struct BundleObject {
    /// Cold storage key
    pub key: String,
    /// Object body
    pub bytes: Vec<u8>,
    /// MIME type
    pub content_type: &'static str,
}

/// Metadata document stored next to the bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Bundle name
    pub name: String,
    /// Archive run (descriptor id) that produced the bundle
    pub run_id: Uuid,
    /// Encoding of the data object
    pub format: String,
    /// Number of records
    pub record_count: u64,
    /// Oldest record timestamp
    pub range_start: DateTime<Utc>,
    /// Newest record timestamp
    pub range_end: DateTime<Utc>,
    /// Size of the JSONL stream before compression
    pub uncompressed_bytes: u64,
    /// Size of the compressed data object
    pub compressed_bytes: u64,
    /// BLAKE3 of the compressed data object
    pub data_blake3: String,
    /// Key of the compressed data object
    pub data_key: String,
    /// Key of the human-readable export
    pub export_key: String,
    /// When the bundle was built
    pub created_at: DateTime<Utc>,
}

/// A fully encoded bundle
#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    /// Bundle name, e.g. `audit-20260301T020000Z-<run id>`
    pub name: String,
    /// Common key prefix, `logs/archived/<YYYY>/<MM>/<name>`
    pub key_prefix: String,
    /// Metadata document
    pub metadata: BundleMetadata,
    /// Objects to upload: data, export, metadata
    pub objects: Vec<BundleObject>,
}

impl ArchiveBundle {
    /// Key of the compressed data object
    #[must_use]
    pub fn data_key(&self) -> &str {
        &self.metadata.data_key
    }

    /// Compressed size in bytes
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.metadata.compressed_bytes
    }
}

/// Bundle name for run `run_id` started at `created_at`
#[must_use]
pub fn bundle_name(run_id: Uuid, created_at: &DateTime<Utc>) -> String {
    format!("audit-{}-{}", created_at.format("%Y%m%dT%H%M%SZ"), run_id.simple())
}

/// Date-partitioned key prefix for a bundle
#[must_use]
pub fn key_prefix(created_at: &DateTime<Utc>, name: &str) -> String {
    format!("{}/{}/{}", ARCHIVE_ROOT, created_at.format("%Y/%m"), name)
}

/// Encode `records` into a bundle
///
/// # Errors
///
/// Returns a validation error for an empty record set, or an I/O error if
/// compression fails.
pub fn build(
    records: &[AuditRecord],
    run_id: Uuid,
    created_at: DateTime<Utc>,
    level: i32,
) -> Result<ArchiveBundle> {
    let (Some(first), Some(last)) = (
        records.iter().map(|r| r.created_at).min(),
        records.iter().map(|r| r.created_at).max(),
    ) else {
        return Err(Error::Validation("cannot build an empty archive bundle".into()));
    };

    let name = bundle_name(run_id, &created_at);
    let prefix = key_prefix(&created_at, &name);

    let mut jsonl = Vec::new();
    for record in records {
        serde_json::to_writer(&mut jsonl, record)?;
        jsonl.push(b'\n');
    }
    let compressed = zstd::encode_all(jsonl.as_slice(), level)?;
    let export = render_export(records);

    let data_key = format!("{prefix}.jsonl.zst");
    let export_key = format!("{prefix}.log");
    let metadata = BundleMetadata {
        name: name.clone(),
        run_id,
        format: "jsonl+zstd".to_string(),
        record_count: records.len() as u64,
        range_start: first,
        range_end: last,
        uncompressed_bytes: jsonl.len() as u64,
        compressed_bytes: compressed.len() as u64,
        data_blake3: blake3::hash(&compressed).to_hex().to_string(),
        data_key: data_key.clone(),
        export_key: export_key.clone(),
        created_at,
    };
    let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;

    let objects = vec![
        BundleObject {
            key: data_key,
            bytes: compressed,
            content_type: "application/zstd",
        },
        BundleObject {
            key: export_key,
            bytes: export.into_bytes(),
            content_type: "text/plain; charset=utf-8",
        },
        BundleObject {
            key: format!("{prefix}.meta.json"),
            bytes: metadata_bytes,
            content_type: "application/json",
        },
    ];

    Ok(ArchiveBundle {
        name,
        key_prefix: prefix,
        metadata,
        objects,
    })
}

/// Decode the compressed data object back into records
pub fn read_records(compressed: &[u8]) -> Result<Vec<AuditRecord>> {
    let jsonl = zstd::decode_all(compressed)?;
    jsonl
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).map_err(Error::from))
        .collect()
}

fn render_export(records: &[AuditRecord]) -> String {
    let mut out = String::new();
    for r in records {
        let resource = if r.resource_id.is_empty() {
            r.resource.clone()
        } else {
            format!("{}/{}", r.resource, r.resource_id)
        };
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "{} actor={} action={} resource={} origin={} client={:?} detail={} digest={}",
            r.created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            r.actor_id,
            r.action,
            resource,
            r.origin,
            r.client,
            r.detail,
            r.digest,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditBuilder};
    use chrono::TimeZone;
    use serde_json::json;

    fn records(n: usize) -> Vec<AuditRecord> {
        let base = Utc.with_ymd_and_hms(2026, 2, 20, 8, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                AuditBuilder::build_at(
                    Some(i as i64),
                    AuditAction::Create,
                    "enrollments",
                    i.to_string(),
                    json!({"seq": i}),
                    "10.1.1.1",
                    "agent",
                    base + chrono::Duration::minutes(i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn test_keys_are_date_partitioned() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let run_id = Uuid::from_u128(0x0192_5e1c_0000_7000_8000_0000_0000_002a);
        let bundle = build(&records(3), run_id, at, 3).unwrap();

        let name = "audit-20260301T020000Z-01925e1c00007000800000000000002a";
        assert_eq!(bundle.name, name);
        assert_eq!(bundle.metadata.run_id, run_id);
        let keys: Vec<_> = bundle.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                format!("logs/archived/2026/03/{name}.jsonl.zst"),
                format!("logs/archived/2026/03/{name}.log"),
                format!("logs/archived/2026/03/{name}.meta.json"),
            ]
        );
    }

    #[test]
    fn test_runs_in_the_same_second_get_distinct_keys() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let first = build(&records(1), Uuid::now_v7(), at, 3).unwrap();
        let second = build(&records(1), Uuid::now_v7(), at, 3).unwrap();
        assert_ne!(first.key_prefix, second.key_prefix);
        assert!(!second.key_prefix.starts_with(&first.key_prefix));
    }

    #[test]
    fn test_data_object_decodes_to_same_records() {
        let input = records(5);
        let bundle = build(&input, Uuid::now_v7(), Utc::now(), 3).unwrap();
        let decoded = read_records(&bundle.objects[0].bytes).unwrap();
        assert_eq!(decoded, input);
        assert!(decoded.iter().all(|r| r.verify().is_ok()));
    }

    #[test]
    fn test_metadata_describes_bundle() {
        let input = records(4);
        let bundle = build(&input, Uuid::now_v7(), Utc::now(), 3).unwrap();
        let meta = &bundle.metadata;

        assert_eq!(meta.record_count, 4);
        assert_eq!(meta.range_start, input[0].created_at);
        assert_eq!(meta.range_end, input[3].created_at);
        assert_eq!(meta.compressed_bytes, bundle.objects[0].bytes.len() as u64);
        assert_eq!(
            meta.data_blake3,
            blake3::hash(&bundle.objects[0].bytes).to_hex().to_string()
        );

        let stored: BundleMetadata = serde_json::from_slice(&bundle.objects[2].bytes).unwrap();
        assert_eq!(&stored, meta);
    }

    #[test]
    fn test_export_has_one_line_per_record() {
        let bundle = build(&records(3), Uuid::now_v7(), Utc::now(), 3).unwrap();
        let text = String::from_utf8(bundle.objects[1].bytes.clone()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("resource=enrollments/1"));
    }

    #[test]
    fn test_empty_bundle_rejected() {
        assert!(matches!(build(&[], Uuid::now_v7(), Utc::now(), 3), Err(Error::Validation(_))));
    }
}
