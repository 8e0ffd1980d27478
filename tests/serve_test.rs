//! # HTTP API Tests
//!
//! Runs the router on an ephemeral port against an in-memory store, with a
//! stand-in passport service that grants `Bearer good`, denies `Bearer nope`
//! and answers 401 to anything else.
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test --test serve_test
//! ```

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use stream_vault::cipher::TransportCipher;
use stream_vault::config::PassportConfig;
use stream_vault::constants::{DEFAULT_STORE_NAME, SEGMENT_TABLE};
use stream_vault::db::{open_sqlite_in_memory, StoreHandle, StoreRegistry};
use stream_vault::keys::KeyStore;
use stream_vault::passport::PassportClient;
use stream_vault::segments::SegmentStore;
use stream_vault::serve::{build_router, AppState};

const KEY: &str = "00112233445566778899aabbccddeeff";
const IV: &str = "0102030405060708090a0b0c0d0e0f10";

async fn play_rights(headers: HeaderMap) -> Response {
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some("Bearer good") => Json(json!({
            "status": "ok",
            "msg": "",
            "data": { "hasPermission": true }
        }))
        .into_response(),
        Some("Bearer nope") => Json(json!({
            "status": "ok",
            "msg": "",
            "data": { "hasPermission": false, "reason": "not purchased" }
        }))
        .into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("{}", addr)
}

struct TestServer {
    /// host:port the app listens on
    addr: String,
    client: reqwest::Client,
    state: Arc<AppState>,
}

impl TestServer {
    async fn start() -> Self {
        let passport_addr =
            spawn(Router::new().route("/api/get-user-play-rights", get(play_rights))).await;

        let pool = open_sqlite_in_memory().await.unwrap();
        let handle =
            StoreHandle::new(DEFAULT_STORE_NAME, pool, "").with_shard_count(SEGMENT_TABLE, 4);
        handle.init_schema().await.unwrap();
        let mut registry = StoreRegistry::new();
        registry.register(handle);

        let passport = PassportClient::new(Some(&PassportConfig {
            endpoint: format!("http://{}", passport_addr),
            play_rights_api: "/api/get-user-play-rights".to_string(),
            timeout_ms: 2000,
        }))
        .unwrap();
        let state = AppState {
            registry,
            passport,
            transport: TransportCipher::player_default(),
            cdn_base: Some("https://cdn.example".to_string()),
        };
        let state = Arc::new(state);
        let addr = spawn(build_router(state.clone(), Duration::from_secs(10))).await;

        Self {
            addr,
            client: reqwest::Client::new(),
            state,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth("good")
    }

    async fn save_sample(&self) {
        let body = json!({
            "video_id": "v1",
            "key": KEY,
            "iv": IV,
            "ts_data": [
                {"ts_sequence": 0, "ts_path": "/seg/0.ts", "duration": 2.0, "definition": "720p"},
                {"ts_sequence": 2, "ts_path": "/seg/2.ts", "duration": 3.5, "definition": "720p"},
                {"ts_sequence": 1, "ts_path": "https://other.example/1.ts", "duration": 1.0, "definition": "720p"}
            ]
        });
        let resp = self
            .client
            .post(self.url("/video_ts/save"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let envelope: Value = resp.json().await.unwrap();
        assert_eq!(envelope["code"], 0);
        assert_eq!(envelope["data"]["count"], 3);
    }
}

#[tokio::test]
async fn health_and_request_id() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/health"))
        .header("X-Request-Id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["x-request-id"], "abc-123");
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    let generated = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(!generated.is_empty());
}

#[tokio::test]
async fn save_rejects_bad_bodies() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .post(server.url("/video_ts/save"))
        .json(&json!({ "video_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope["code"], 1001);

    let resp = server
        .client
        .post(server.url("/video_ts/save"))
        .json(&json!({ "video_id": "v1", "key": "", "iv": IV, "ts_data": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope["code"], 1001);
}

#[tokio::test]
async fn list_returns_ordered_segments_to_authorized_callers() {
    let server = TestServer::start().await;
    server.save_sample().await;

    let resp = server.get("/video_ts/list?video_id=v1").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let envelope: Value = resp.json().await.unwrap();
    let sequences: Vec<i64> = envelope["data"]["ts_list"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["ts_sequence"].as_i64().unwrap())
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(envelope["data"]["video_id"], "v1");

    let resp = server
        .client
        .get(server.url("/video_ts/list?video_id=v1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let resp = server.get("/video_ts/list").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn media_playlist_and_key() {
    let server = TestServer::start().await;
    server.save_sample().await;

    let resp = server.get("/play/v1/index.m3u8").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers()["content-type"],
        "application/vnd.apple.mpegurl"
    );
    let text = resp.text().await.unwrap();
    assert!(text.starts_with("#EXTM3U\n"));
    assert!(text.contains("#EXT-X-TARGETDURATION:4\n"));
    assert!(text.contains(&format!(
        "URI=\"http://{}/play/key/v1\",IV=0x{}",
        server.addr, IV
    )));
    assert!(text.contains("#EXTINF:1.000000,\nhttps://other.example/1.ts\n"));
    assert!(text.contains("https://cdn.example/seg/2.ts\n"));
    assert!(text.ends_with("#EXT-X-ENDLIST\n"));

    let resp = server
        .get("/play/v1/index.m3u8?app=kids")
        .header("X-Forwarded-Proto", "https")
        .header("X-Forwarded-Host", "play.example")
        .send()
        .await
        .unwrap();
    let text = resp.text().await.unwrap();
    assert!(text.contains("URI=\"https://play.example/play/key/v1?app=kids\""));

    let resp = server.get("/play/key/v1").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(bytes.to_vec(), hex::decode(KEY).unwrap());
}

#[tokio::test]
async fn playback_requires_rights() {
    let server = TestServer::start().await;
    server.save_sample().await;

    for path in ["/play/v1/index.m3u8", "/play/v1/index.c3u8", "/play/key/v1", "/play/v1"] {
        let resp = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 403, "{}", path);
        let envelope: Value = resp.json().await.unwrap();
        assert_eq!(envelope["code"], 403);

        let resp = server
            .client
            .get(server.url(path))
            .bearer_auth("nope")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 403, "{}", path);
    }

    let resp = server
        .client
        .get(server.url("/play/v1/index.m3u8"))
        .header("Cookie", "lang=en; token=good")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn c3u8_wraps_the_media_playlist() {
    let server = TestServer::start().await;
    server.save_sample().await;

    let plain = server
        .get("/play/v1/index.m3u8")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let resp = server.get("/play/v1/index.c3u8").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope["code"], 0);
    let sealed = base64::engine::general_purpose::STANDARD
        .decode(envelope["data"]["info"].as_str().unwrap())
        .unwrap();
    let opened = TransportCipher::player_default().open(&sealed).unwrap();
    assert_eq!(String::from_utf8(opened).unwrap(), plain);
}

#[tokio::test]
async fn master_playlist_points_at_media_playlist() {
    let server = TestServer::start().await;

    let resp = server.get("/play/v1?app=kids").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.starts_with("#EXTM3U\n#EXT-X-STREAM-INF:"));
    assert!(text.ends_with("/play/v1/index.m3u8?app=kids"));
}

#[tokio::test]
async fn unknown_and_deleted_videos() {
    let server = TestServer::start().await;

    let resp = server.get("/play/missing/index.m3u8").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope["code"], 1003);

    server.save_sample().await;
    let resp = server
        .client
        .delete(server.url("/video_ts/v1"))
        .bearer_auth("good")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope["data"]["deleted"], 3);

    let resp = server.get("/play/v1/index.m3u8").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let resp = server.get("/play/key/v1").send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let envelope: Value = resp.json().await.unwrap();
    assert_eq!(envelope["code"], 1002);
}

#[tokio::test]
async fn delete_requires_rights_and_keeps_data_when_refused() {
    let server = TestServer::start().await;
    server.save_sample().await;

    let unauthenticated = server
        .client
        .delete(server.url("/video_ts/v1"))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthenticated.status().as_u16(), 403);
    let envelope: Value = unauthenticated.json().await.unwrap();
    assert_eq!(envelope["code"], 403);

    let denied = server
        .client
        .delete(server.url("/video_ts/v1"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 403);

    let segments = SegmentStore::new(&server.state.registry, None);
    assert_eq!(segments.count("v1").await.unwrap(), 3);
    let keys = KeyStore::new(&server.state.registry, None);
    assert!(keys.get_by_video_id("v1").await.is_ok());
}
