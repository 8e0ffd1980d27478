//! Segment (TS) store. Rows of one video live in the shard table picked by
//! [`crate::shard::route`] from its video id.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::{INSERT_BATCH_SIZE, SEGMENT_TABLE};
use crate::db::{StoreHandle, StoreRegistry};
use crate::error::StoreError;
use crate::queries::segments as sql;

/// One media chunk of one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SegmentRecord {
    pub video_id: String,
    #[sqlx(rename = "ts_sequence")]
    #[serde(rename = "ts_sequence", alias = "sequence")]
    pub sequence: i64,
    #[sqlx(rename = "ts_path")]
    #[serde(rename = "ts_path", alias = "path")]
    pub path: String,
    pub duration: f64,
    #[serde(default)]
    pub definition: String,
    #[sqlx(rename = "create_time")]
    #[serde(rename = "create_time", alias = "created_at", default)]
    pub created_at: i64,
}

impl SegmentRecord {
    fn validate(&self, video_id: &str) -> Result<(), StoreError> {
        if self.video_id != video_id {
            return Err(StoreError::invalid(format!(
                "segment {} belongs to video '{}', not '{}'",
                self.sequence, self.video_id, video_id
            )));
        }
        if self.sequence < 0 {
            return Err(StoreError::invalid(format!(
                "ts_sequence must be >= 0, got {}",
                self.sequence
            )));
        }
        if !(self.duration > 0.0 && self.duration.is_finite()) {
            return Err(StoreError::invalid(format!(
                "segment {} has non-positive duration {}",
                self.sequence, self.duration
            )));
        }
        if self.path.is_empty() {
            return Err(StoreError::invalid(format!(
                "segment {} has an empty ts_path",
                self.sequence
            )));
        }
        Ok(())
    }
}

/// Segment store bound to one application's backing store
pub struct SegmentStore<'a> {
    registry: &'a StoreRegistry,
    app: Option<&'a str>,
    request_id: &'a str,
}

impl<'a> SegmentStore<'a> {
    pub fn new(registry: &'a StoreRegistry, app: Option<&'a str>) -> Self {
        Self {
            registry,
            app,
            request_id: "-",
        }
    }

    pub fn with_request_id(mut self, request_id: &'a str) -> Self {
        self.request_id = request_id;
        self
    }

    fn locate(&self, video_id: &str) -> Result<(&'a StoreHandle, String), StoreError> {
        let handle = self.registry.resolve(self.app)?;
        let table = handle.routed_table(SEGMENT_TABLE, video_id);
        Ok((handle, table))
    }

    fn check_batch(video_id: &str, segments: &[SegmentRecord]) -> Result<(), StoreError> {
        if video_id.is_empty() {
            return Err(StoreError::invalid("video_id is empty"));
        }
        if segments.is_empty() {
            return Err(StoreError::invalid("segment list is empty"));
        }
        segments.iter().try_for_each(|s| s.validate(video_id))
    }

    /// Append `segments` to the video's shard table.
    ///
    /// Rows go out in statements of [`INSERT_BATCH_SIZE`] inside one transaction.
    /// An empty list fails without touching the store.
    pub async fn batch_insert(
        &self,
        video_id: &str,
        segments: &[SegmentRecord],
    ) -> Result<u64, StoreError> {
        Self::check_batch(video_id, segments)?;
        let (handle, table) = self.locate(video_id)?;
        let backend = handle.backend();
        let statements: Vec<String> = segments
            .chunks(INSERT_BATCH_SIZE)
            .map(|chunk| sql::insert_many(backend, &table, chunk))
            .collect();
        let inserted = handle.pool().execute_in_transaction(&statements).await?;
        debug!(
            "[req={}] [SegmentStore.batch_insert] video={} table={} rows={} statements={}",
            self.request_id,
            video_id,
            table,
            inserted,
            statements.len()
        );
        Ok(inserted)
    }

    /// Replace the video's segments for every definition present in `segments`.
    ///
    /// Delete and insert share one transaction, so readers see either the old or
    /// the new set. Definitions absent from `segments` are left alone.
    pub async fn replace(
        &self,
        video_id: &str,
        segments: &[SegmentRecord],
    ) -> Result<u64, StoreError> {
        Self::check_batch(video_id, segments)?;
        let (handle, table) = self.locate(video_id)?;
        let backend = handle.backend();

        let definitions: BTreeSet<&str> = segments.iter().map(|s| s.definition.as_str()).collect();
        let definitions: Vec<&str> = definitions.into_iter().collect();

        let mut statements = Vec::with_capacity(1 + segments.len() / INSERT_BATCH_SIZE + 1);
        statements.push(sql::delete_by_video_definitions(
            backend,
            &table,
            video_id,
            &definitions,
        ));
        statements.extend(
            segments
                .chunks(INSERT_BATCH_SIZE)
                .map(|chunk| sql::insert_many(backend, &table, chunk)),
        );
        handle.pool().execute_in_transaction(&statements).await?;
        debug!(
            "[req={}] [SegmentStore.replace] video={} table={} definitions={:?} rows={}",
            self.request_id,
            video_id,
            table,
            definitions,
            segments.len()
        );
        Ok(segments.len() as u64)
    }

    /// Segments of a video in play order. An empty filter means every definition.
    pub async fn list(
        &self,
        video_id: &str,
        definition: Option<&str>,
    ) -> Result<Vec<SegmentRecord>, StoreError> {
        let (handle, table) = self.locate(video_id)?;
        let definition = definition.filter(|d| !d.is_empty());
        let query = sql::select_by_video(handle.backend(), &table, video_id, definition);
        let rows: Vec<SegmentRecord> = handle.pool().fetch_all(&query).await?;
        debug!(
            "[req={}] [SegmentStore.list] video={} table={} definition={:?} rows={}",
            self.request_id,
            video_id,
            table,
            definition,
            rows.len()
        );
        Ok(rows)
    }

    pub async fn count(&self, video_id: &str) -> Result<i64, StoreError> {
        let (handle, table) = self.locate(video_id)?;
        let query = sql::count_by_video(handle.backend(), &table, video_id);
        Ok(handle.pool().fetch_count(&query).await?)
    }

    /// Delete every segment of a video, returning the number of rows removed
    pub async fn delete_all(&self, video_id: &str) -> Result<u64, StoreError> {
        let (handle, table) = self.locate(video_id)?;
        let query = sql::delete_by_video(handle.backend(), &table, video_id);
        let deleted = handle.pool().execute(&query).await?;
        debug!(
            "[req={}] [SegmentStore.delete_all] video={} table={} rows={}",
            self.request_id, video_id, table, deleted
        );
        Ok(deleted)
    }
}
