//! Ingestion write path: one request stores a video's segments and its key.

use log::info;
use serde::{Deserialize, Serialize};

use crate::constants::HLS_KEY_BYTES;
use crate::db::StoreRegistry;
use crate::error::StoreError;
use crate::keys::{strip_hex_prefix, KeyStore};
use crate::segments::{SegmentRecord, SegmentStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub video_id: String,
    /// AES-128 key, hex
    pub key: String,
    /// AES-128 IV, hex
    pub iv: String,
    pub ts_data: Vec<IngestSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSegment {
    pub ts_sequence: i64,
    pub ts_path: String,
    pub duration: f64,
    #[serde(default)]
    pub definition: String,
}

fn check_hex_128(field: &str, value: &str) -> Result<(), StoreError> {
    let bytes = hex::decode(strip_hex_prefix(value))
        .map_err(|e| StoreError::invalid(format!("{} is not hex: {}", field, e)))?;
    if bytes.len() != HLS_KEY_BYTES {
        return Err(StoreError::invalid(format!(
            "{} must be {} bytes, got {}",
            field,
            HLS_KEY_BYTES,
            bytes.len()
        )));
    }
    Ok(())
}

impl IngestRequest {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.video_id.is_empty() {
            return Err(StoreError::invalid("video_id is empty"));
        }
        if self.key.is_empty() {
            return Err(StoreError::invalid("key is empty"));
        }
        if self.iv.is_empty() {
            return Err(StoreError::invalid("iv is empty"));
        }
        if self.ts_data.is_empty() {
            return Err(StoreError::invalid("ts_data is empty"));
        }
        check_hex_128("key", &self.key)?;
        check_hex_128("iv", &self.iv)?;
        for ts in &self.ts_data {
            if ts.ts_path.is_empty() {
                return Err(StoreError::invalid(format!(
                    "ts_path is empty for ts_sequence {}",
                    ts.ts_sequence
                )));
            }
            if ts.ts_sequence < 0 {
                return Err(StoreError::invalid(format!(
                    "ts_sequence must be >= 0, got {}",
                    ts.ts_sequence
                )));
            }
            if !(ts.duration > 0.0 && ts.duration.is_finite()) {
                return Err(StoreError::invalid(format!(
                    "duration must be > 0 for ts_sequence {}, got {}",
                    ts.ts_sequence, ts.duration
                )));
            }
        }
        Ok(())
    }

    /// Segment records stamped with the video id and `created_at`
    pub fn to_records(&self, created_at: i64) -> Vec<SegmentRecord> {
        self.ts_data
            .iter()
            .map(|ts| SegmentRecord {
                video_id: self.video_id.clone(),
                sequence: ts.ts_sequence,
                path: ts.ts_path.clone(),
                duration: ts.duration,
                definition: ts.definition.clone(),
                created_at,
            })
            .collect()
    }
}

/// Store a video's segments and key.
///
/// Segments of every definition in the request replace the stored ones of that
/// definition. The key record is overwritten with bare lowercase hex.
/// Returns the number of segments stored.
pub async fn ingest(
    registry: &StoreRegistry,
    app: Option<&str>,
    request: &IngestRequest,
    request_id: &str,
) -> Result<u64, StoreError> {
    request.validate()?;
    let records = request.to_records(chrono::Utc::now().timestamp());

    let stored = SegmentStore::new(registry, app)
        .with_request_id(request_id)
        .replace(&request.video_id, &records)
        .await?;
    KeyStore::new(registry, app)
        .with_request_id(request_id)
        .put(
            &request.video_id,
            &strip_hex_prefix(&request.key).to_ascii_lowercase(),
            &strip_hex_prefix(&request.iv).to_ascii_lowercase(),
        )
        .await?;

    info!(
        "[req={}] [Ingest] stored video={} segments={}",
        request_id, request.video_id, stored
    );
    Ok(stored)
}

/// Remove a video's segments and key. Returns the number of segments removed.
pub async fn delete_video(
    registry: &StoreRegistry,
    app: Option<&str>,
    video_id: &str,
    request_id: &str,
) -> Result<u64, StoreError> {
    if video_id.is_empty() {
        return Err(StoreError::invalid("video_id is empty"));
    }
    let removed = SegmentStore::new(registry, app)
        .with_request_id(request_id)
        .delete_all(video_id)
        .await?;
    KeyStore::new(registry, app)
        .with_request_id(request_id)
        .delete_by_video_id(video_id)
        .await?;
    info!(
        "[req={}] [Ingest] deleted video={} segments={}",
        request_id, video_id, removed
    );
    Ok(removed)
}
