//! Per-video AES key store. One record per video id, never sharded.

use log::debug;
use serde::Serialize;

use crate::constants::KEY_TABLE;
use crate::db::{is_unique_violation, StoreHandle, StoreRegistry};
use crate::error::StoreError;
use crate::queries::keys as sql;

/// Key material of one video, both fields hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct KeyRecord {
    pub video_id: String,
    #[sqlx(rename = "key_hex")]
    pub key: String,
    #[sqlx(rename = "iv_hex")]
    pub iv: String,
    #[sqlx(rename = "create_time")]
    pub created_at: i64,
}

/// `value` without a leading `0x` / `0X`
pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

impl KeyRecord {
    /// Raw key bytes as served by the key endpoint
    pub fn key_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(strip_hex_prefix(&self.key))
    }

    /// IV as declared in `#EXT-X-KEY`, without any `0x` prefix
    pub fn iv_hex(&self) -> &str {
        strip_hex_prefix(&self.iv)
    }
}

pub struct KeyStore<'a> {
    registry: &'a StoreRegistry,
    app: Option<&'a str>,
    request_id: &'a str,
}

impl<'a> KeyStore<'a> {
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

    fn locate(&self) -> Result<(&'a StoreHandle, String), StoreError> {
        let handle = self.registry.resolve(self.app)?;
        let table = handle.table_name(KEY_TABLE);
        Ok((handle, table))
    }

    fn check(video_id: &str, key: &str) -> Result<(), StoreError> {
        if video_id.is_empty() {
            return Err(StoreError::invalid("video_id is empty"));
        }
        if key.is_empty() {
            return Err(StoreError::invalid("key is empty"));
        }
        Ok(())
    }

    /// Insert the key record of a new video. A second record for the same video fails.
    pub async fn create(&self, video_id: &str, key: &str, iv: &str) -> Result<(), StoreError> {
        Self::check(video_id, key)?;
        let (handle, table) = self.locate()?;
        let query = sql::insert(
            handle.backend(),
            &table,
            video_id,
            key,
            iv,
            chrono::Utc::now().timestamp(),
        );
        match handle.pool().execute(&query).await {
            Ok(_) => {
                debug!(
                    "[req={}] [KeyStore.create] video={} table={}",
                    self.request_id, video_id, table
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::already_exists("key record", video_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or overwrite the key record of a video
    pub async fn put(&self, video_id: &str, key: &str, iv: &str) -> Result<(), StoreError> {
        Self::check(video_id, key)?;
        let (handle, table) = self.locate()?;
        let query = sql::upsert(
            handle.backend(),
            &table,
            video_id,
            key,
            iv,
            chrono::Utc::now().timestamp(),
        );
        handle.pool().execute(&query).await?;
        debug!(
            "[req={}] [KeyStore.put] video={} table={}",
            self.request_id, video_id, table
        );
        Ok(())
    }

    pub async fn get_by_video_id(&self, video_id: &str) -> Result<KeyRecord, StoreError> {
        let (handle, table) = self.locate()?;
        let query = sql::select_by_video(handle.backend(), &table, video_id);
        handle
            .pool()
            .fetch_optional::<KeyRecord>(&query)
            .await?
            .ok_or_else(|| StoreError::not_found("key record", video_id))
    }

    /// Remove the key record of a video. Removing an absent record is not an error.
    pub async fn delete_by_video_id(&self, video_id: &str) -> Result<u64, StoreError> {
        let (handle, table) = self.locate()?;
        let query = sql::delete_by_video(handle.backend(), &table, video_id);
        let deleted = handle.pool().execute(&query).await?;
        debug!(
            "[req={}] [KeyStore.delete_by_video_id] video={} rows={}",
            self.request_id, video_id, deleted
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iv_hex_strips_prefix() {
        let mut record = KeyRecord {
            video_id: "v".into(),
            key: "00".into(),
            iv: "0xABCD".into(),
            created_at: 0,
        };
        assert_eq!(record.iv_hex(), "ABCD");
        record.iv = "abcd".into();
        assert_eq!(record.iv_hex(), "abcd");
    }

    #[test]
    fn key_bytes_accepts_prefixed_hex() {
        let record = KeyRecord {
            video_id: "v".into(),
            key: "0X00ff".into(),
            iv: String::new(),
            created_at: 0,
        };
        assert_eq!(record.key_bytes().unwrap(), vec![0x00, 0xff]);
    }
}
