//! Deterministic video id → physical table routing.
//!
//! The hash must stay stable across restarts and releases: segments written under one
//! shard count are only readable while the same count and the same hash are in use.

/// FNV-1a 64-bit. An empty key maps to 0, i.e. always shard 0.
pub fn hash_shard_key(shard_key: &str) -> u64 {
    if shard_key.is_empty() {
        return 0;
    }
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    for &b in shard_key.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

/// Shard index of `shard_key` in `[0, shard_count)`. `shard_count` must be > 0.
pub fn shard_index(shard_key: &str, shard_count: u32) -> u32 {
    (hash_shard_key(shard_key) % shard_count as u64) as u32
}

/// Physical table name for `shard_key`: `base_name` when `shard_count <= 1`,
/// otherwise `{base_name}_{index}`.
pub fn route(shard_key: &str, shard_count: u32, base_name: &str) -> String {
    if shard_count <= 1 {
        return base_name.to_string();
    }
    format!("{}_{}", base_name, shard_index(shard_key, shard_count))
}

/// Every physical table behind `base_name` for the given shard count.
pub fn all_tables(shard_count: u32, base_name: &str) -> Vec<String> {
    if shard_count <= 1 {
        return vec![base_name.to_string()];
    }
    (0..shard_count)
        .map(|i| format!("{}_{}", base_name, i))
        .collect()
}
