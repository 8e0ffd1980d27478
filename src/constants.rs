use rand::RngCore;

/// Default logical store; an application-specific store is named `{DEFAULT_STORE_NAME}_{app}`
pub const DEFAULT_STORE_NAME: &str = "stream";

/// Logical segment table, sharded by video id
pub const SEGMENT_TABLE: &str = "video_ts";

/// Logical key table, never sharded
pub const KEY_TABLE: &str = "video_encrypt";

/// Rows per INSERT statement when storing segments
pub const INSERT_BATCH_SIZE: usize = 100;

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const KEY_CONTENT_TYPE: &str = "application/octet-stream";

/// CDN entry used for segment URLs when no per-request region applies
pub const DEFAULT_CDN: &str = "default";

/// Transport key for the private player protocol (AES-128-GCM)
pub const PLAYER_TRANSPORT_KEY: &[u8; 16] = b"0123456789abcdef";

/// Transport nonce for the private player protocol
pub const PLAYER_TRANSPORT_NONCE: &[u8; 12] = b"0123456789ab";

/// HLS key/IV size; manifests always declare METHOD=AES-128
pub const HLS_KEY_BYTES: usize = 16;

/// Generate a random AES-128 key and IV, hex encoded, for ingestion tooling
pub fn generate_key_material() -> (String, String) {
    let mut key = [0u8; HLS_KEY_BYTES];
    let mut iv = [0u8; HLS_KEY_BYTES];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut key);
    rng.fill_bytes(&mut iv);
    (hex::encode(key), hex::encode(iv))
}
