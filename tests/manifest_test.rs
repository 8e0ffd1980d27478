//! # Manifest Tests
//!
//! HLS media playlist synthesis from stored segments and keys.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test manifest_test
//! ```

use stream_vault::constants::{DEFAULT_STORE_NAME, SEGMENT_TABLE};
use stream_vault::db::{open_sqlite_in_memory, StoreHandle, StoreRegistry};
use stream_vault::keys::{KeyRecord, KeyStore};
use stream_vault::manifest::{self, ManifestOptions};
use stream_vault::segments::{SegmentRecord, SegmentStore};
use stream_vault::ManifestError;

const KEY: &str = "00112233445566778899aabbccddeeff";
const IV: &str = "000102030405060708090a0b0c0d0e0f";

async fn registry() -> StoreRegistry {
    let pool = open_sqlite_in_memory().await.unwrap();
    let handle = StoreHandle::new(DEFAULT_STORE_NAME, pool, "").with_shard_count(SEGMENT_TABLE, 8);
    handle.init_schema().await.unwrap();
    let mut registry = StoreRegistry::new();
    registry.register(handle);
    registry
}

fn seg(sequence: i64, duration: f64, path: &str) -> SegmentRecord {
    SegmentRecord {
        video_id: "v1".to_string(),
        sequence,
        path: path.to_string(),
        duration,
        definition: "720p".to_string(),
        created_at: 0,
    }
}

fn options() -> ManifestOptions<'static> {
    ManifestOptions {
        base_url: "http://localhost:8080",
        app: Some("kids"),
        cdn_base: Some("https://cdn.example"),
    }
}

#[tokio::test]
async fn builds_full_playlist_from_stored_segments() {
    let registry = registry().await;
    let segments = SegmentStore::new(&registry, None);
    let keys = KeyStore::new(&registry, None);

    segments
        .batch_insert(
            "v1",
            &[
                seg(0, 2.0, "/seg/0.ts"),
                seg(2, 3.5, "/seg/2.ts"),
                seg(1, 1.0, "https://other.example/1.ts"),
            ],
        )
        .await
        .unwrap();
    keys.create("v1", KEY, IV).await.unwrap();

    let listed = segments.list("v1", None).await.unwrap();
    let text = manifest::build(&keys, "v1", &listed, &options()).await.unwrap();

    let expected = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXT-X-ALLOW-CACHE:YES\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"http://localhost:8080/play/key/v1?app=kids\",IV=0x000102030405060708090a0b0c0d0e0f\n\
#EXTINF:2.000000,\n\
https://cdn.example/seg/0.ts\n\
#EXTINF:1.000000,\n\
https://other.example/1.ts\n\
#EXTINF:3.500000,\n\
https://cdn.example/seg/2.ts\n\
#EXT-X-ENDLIST\n";
    assert_eq!(text, expected);
}

#[test]
fn render_sorts_unordered_input() {
    let key = KeyRecord {
        video_id: "v1".into(),
        key: KEY.into(),
        iv: format!("0x{}", IV),
        created_at: 0,
    };
    let segments = vec![seg(5, 0.25, "c.ts"), seg(3, 0.5, "a.ts"), seg(4, 0.125, "b.ts")];
    let opts = ManifestOptions {
        base_url: "https://play.example",
        app: None,
        cdn_base: None,
    };
    let text = manifest::render("v1", &segments, &key, &opts).unwrap();

    assert!(text.contains("#EXT-X-TARGETDURATION:1\n"));
    assert!(text.contains("URI=\"https://play.example/play/key/v1\",IV=0x0001"));
    assert!(!text.contains("0x0x"));
    let a = text.find("a.ts").unwrap();
    let b = text.find("b.ts").unwrap();
    let c = text.find("c.ts").unwrap();
    assert!(a < b && b < c);
    assert!(text.contains("#EXTINF:0.125000,\nb.ts\n"));
    assert!(text.ends_with("#EXT-X-ENDLIST\n"));
}

#[tokio::test]
async fn zero_segments_fail_before_key_lookup() {
    let registry = registry().await;
    let keys = KeyStore::new(&registry, None);

    let err = manifest::build(&keys, "v1", &[], &options()).await.unwrap_err();
    assert!(matches!(err, ManifestError::NoSegments(ref id) if id == "v1"));
    assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn segments_without_key_fail_with_key_not_found() {
    let registry = registry().await;
    let keys = KeyStore::new(&registry, None);

    let err = manifest::build(&keys, "v1", &[seg(0, 2.0, "a.ts")], &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ManifestError::KeyNotFound(ref id) if id == "v1"));
}

#[test]
fn empty_iv_is_incomplete() {
    let key = KeyRecord {
        video_id: "v1".into(),
        key: KEY.into(),
        iv: String::new(),
        created_at: 0,
    };
    let err = manifest::render("v1", &[seg(0, 2.0, "a.ts")], &key, &options()).unwrap_err();
    assert!(matches!(err, ManifestError::KeyIncomplete(_)));
}

#[tokio::test]
async fn unavailable_store_surfaces_through_manifest_error() {
    let registry = StoreRegistry::new();
    let keys = KeyStore::new(&registry, None);

    let err = manifest::build(&keys, "v1", &[seg(0, 2.0, "a.ts")], &options())
        .await
        .unwrap_err();
    assert!(matches!(err, ManifestError::Store(_)));
    assert_eq!(err.http_status(), 503);
}
