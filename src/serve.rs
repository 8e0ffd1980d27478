use axum::{
    body::Body,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc as StdArc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::cipher::{CipherMode, TransportCipher};
use crate::config::AppConfig;
use crate::constants::{HLS_CONTENT_TYPE, KEY_CONTENT_TYPE};
use crate::credentials;
use crate::db::StoreRegistry;
use crate::error::{ManifestError, StoreError};
use crate::ingest::{self, IngestRequest};
use crate::keys::KeyStore;
use crate::manifest::{self, ManifestOptions};
use crate::passport::PassportClient;
use crate::segments::SegmentStore;

const REQUEST_ID_HEADER: &str = "x-request-id";
const APP_HEADER: &str = "x-app-name";

/// Envelope codes
const CODE_OK: i32 = 0;
const CODE_BAD_PARAM: i32 = 1001;
const CODE_QUERY_FAILED: i32 = 1002;
const CODE_GENERATE_FAILED: i32 = 1003;
const CODE_NO_RIGHTS: i32 = 403;

// Shared state for all handlers
pub struct AppState {
    pub registry: StoreRegistry,
    pub passport: PassportClient,
    pub transport: TransportCipher,
    pub cdn_base: Option<String>,
}

impl AppState {
    pub fn new(config: &AppConfig, registry: StoreRegistry) -> Result<Self, Box<dyn std::error::Error>> {
        let (key, nonce) = config.player.transport_key_and_nonce()?;
        Ok(Self {
            registry,
            passport: PassportClient::new(config.auth.passport.as_ref())?,
            transport: TransportCipher::new(&key, &nonce, CipherMode::Gcm)?,
            cdn_base: config.default_cdn_url().map(str::to_string),
        })
    }
}

/// Request-scoped values handed down to every store call
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub app: Option<String>,
    pub token: Option<String>,
    pub base_url: String,
}

impl RequestContext {
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let request_id = header_str(headers, REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let app = parts
            .uri
            .query()
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == "app")
                    .map(|(_, v)| v.into_owned())
            })
            .or_else(|| header_str(headers, APP_HEADER).map(str::to_string))
            .filter(|a| !a.is_empty());
        Ok(Self {
            request_id,
            app,
            token: bearer_token(headers),
            base_url: request_base_url(headers),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Token from `Authorization: Bearer <token>`, else the `token` cookie
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = header_str(headers, header::AUTHORIZATION.as_str()) {
        let mut parts = auth.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                return Some(token.to_string());
            }
            _ => warn!("Invalid Authorization header format"),
        }
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == "token" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Scheme and host the client used, honouring reverse-proxy headers
pub fn request_base_url(headers: &HeaderMap) -> String {
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = match header_str(headers, "x-forwarded-host") {
        Some(fwd_host) if !fwd_host.contains(':') => match header_str(headers, "x-forwarded-port") {
            Some(port) => format!("{}:{}", fwd_host, port),
            None => fwd_host.to_string(),
        },
        Some(fwd_host) => fwd_host.to_string(),
        None => header_str(headers, header::HOST.as_str())
            .unwrap_or("localhost")
            .to_string(),
    };
    format!("{}://{}", scheme, host)
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    code: i32,
    message: String,
    data: T,
}

fn json_ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        code: CODE_OK,
        message: String::new(),
        data,
    })
    .into_response()
}

fn json_error(status: u16, code: i32, message: impl Into<String>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(Envelope {
            code,
            message: message.into(),
            data: json!({}),
        }),
    )
        .into_response()
}

fn store_error(ctx: &RequestContext, op: &str, code: i32, e: &StoreError) -> Response {
    match e {
        StoreError::InvalidArgument(_) => {
            warn!("[req={}] [{}] {}", ctx.request_id, op, e);
            json_error(e.http_status(), CODE_BAD_PARAM, e.to_string())
        }
        _ => {
            error!("[req={}] [{}] {}", ctx.request_id, op, e);
            json_error(e.http_status(), code, e.to_string())
        }
    }
}

fn manifest_error(ctx: &RequestContext, op: &str, e: &ManifestError) -> Response {
    error!("[req={}] [{}] manifest generation failed: {}", ctx.request_id, op, e);
    json_error(e.http_status(), CODE_GENERATE_FAILED, e.to_string())
}

/// None when playback is allowed, else the 403 response
async fn require_play_rights(
    state: &AppState,
    ctx: &RequestContext,
    op: &str,
    video_id: &str,
) -> Option<Response> {
    if state
        .passport
        .check_play_rights(ctx.token.as_deref(), video_id, &ctx.request_id)
        .await
    {
        return None;
    }
    warn!("[req={}] [{}] no play rights, video={}", ctx.request_id, op, video_id);
    Some(json_error(403, CODE_NO_RIGHTS, "no play rights"))
}

fn hls_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HLS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Build the HTTP router. Every route is wrapped in CORS, a request timeout,
/// and the request-id / timing middleware.
pub fn build_router(state: StdArc<AppState>, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_RANGE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/video_ts/save", post(save_handler))
        .route("/video_ts/list", get(list_handler))
        .route("/video_ts/{video_id}", delete(delete_handler))
        .route("/play/key/{video_id}", get(key_handler))
        .route("/play/{video_id}", get(master_handler))
        .route("/play/{video_id}/index.m3u8", get(m3u8_handler))
        .route("/play/{video_id}/index.c3u8", get(c3u8_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(request_timing))
        .layer(cors)
        .with_state(state)
}

/// Assign a request id when the client did not send one, echo it back, and log timing
async fn request_timing(mut req: Request, next: Next) -> Response {
    let request_id = match header_str(req.headers(), REQUEST_ID_HEADER) {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(req).await;

    info!(
        "[req={}] [RequestCostTime] method={} path={} status={} cost={:?}",
        request_id,
        method,
        path,
        response.status().as_u16(),
        start.elapsed()
    );
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn save_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => {
            warn!("[req={}] [VideoTsSave] bad request body: {}", ctx.request_id, e);
            return json_error(400, CODE_BAD_PARAM, format!("bad request body: {}", e));
        }
    };
    match ingest::ingest(&state.registry, ctx.app(), &request, &ctx.request_id).await {
        Ok(count) => json_ok(json!({ "video_id": request.video_id, "count": count })),
        Err(e) => store_error(&ctx, "VideoTsSave", CODE_QUERY_FAILED, &e),
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    video_id: String,
    #[serde(default)]
    definitions: String,
}

async fn list_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    Query(params): Query<ListParams>,
) -> Response {
    if params.video_id.is_empty() {
        warn!("[req={}] [VideoTsList] video_id is empty", ctx.request_id);
        return json_error(400, CODE_BAD_PARAM, "video_id is empty");
    }
    if let Some(denied) = require_play_rights(&state, &ctx, "VideoTsList", &params.video_id).await {
        return denied;
    }
    let store = SegmentStore::new(&state.registry, ctx.app()).with_request_id(&ctx.request_id);
    match store
        .list(&params.video_id, Some(params.definitions.as_str()))
        .await
    {
        Ok(ts_list) => json_ok(json!({
            "ts_list": ts_list,
            "video_id": params.video_id,
            "definitions": params.definitions,
        })),
        Err(e) => store_error(&ctx, "VideoTsList", CODE_QUERY_FAILED, &e),
    }
}

async fn delete_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    Path(video_id): Path<String>,
) -> Response {
    if let Some(denied) = require_play_rights(&state, &ctx, "VideoTsDelete", &video_id).await {
        return denied;
    }
    match ingest::delete_video(&state.registry, ctx.app(), &video_id, &ctx.request_id).await {
        Ok(deleted) => json_ok(json!({ "video_id": video_id, "deleted": deleted })),
        Err(e) => store_error(&ctx, "VideoTsDelete", CODE_QUERY_FAILED, &e),
    }
}

async fn master_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    Path(video_id): Path<String>,
) -> Response {
    if let Some(denied) = require_play_rights(&state, &ctx, "Play", &video_id).await {
        return denied;
    }
    hls_response(manifest::master_playlist(&video_id, ctx.app()))
}

/// Segments + key → media playlist text
async fn media_playlist(
    state: &AppState,
    ctx: &RequestContext,
    op: &str,
    video_id: &str,
) -> Result<String, Response> {
    let segments = SegmentStore::new(&state.registry, ctx.app())
        .with_request_id(&ctx.request_id)
        .list(video_id, None)
        .await
        .map_err(|e| store_error(ctx, op, CODE_QUERY_FAILED, &e))?;
    let keys = KeyStore::new(&state.registry, ctx.app()).with_request_id(&ctx.request_id);
    let opts = ManifestOptions {
        base_url: &ctx.base_url,
        app: ctx.app(),
        cdn_base: state.cdn_base.as_deref(),
    };
    manifest::build(&keys, video_id, &segments, &opts)
        .await
        .map_err(|e| manifest_error(ctx, op, &e))
}

async fn m3u8_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    Path(video_id): Path<String>,
) -> Response {
    const OP: &str = "PlayHlsIndexM3u8";
    if let Some(denied) = require_play_rights(&state, &ctx, OP, &video_id).await {
        return denied;
    }
    match media_playlist(&state, &ctx, OP, &video_id).await {
        Ok(text) => hls_response(text),
        Err(resp) => resp,
    }
}

async fn c3u8_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    Path(video_id): Path<String>,
) -> Response {
    const OP: &str = "PlayCineHlsIndexC3u8";
    if let Some(denied) = require_play_rights(&state, &ctx, OP, &video_id).await {
        return denied;
    }
    let text = match media_playlist(&state, &ctx, OP, &video_id).await {
        Ok(text) => text,
        Err(resp) => return resp,
    };
    match state.transport.seal_base64(&text) {
        Ok(info) => json_ok(json!({ "info": info })),
        Err(e) => {
            error!("[req={}] [{}] GCM wrap failed: {}", ctx.request_id, OP, e);
            json_error(e.http_status(), CODE_GENERATE_FAILED, e.to_string())
        }
    }
}

async fn key_handler(
    State(state): State<StdArc<AppState>>,
    ctx: RequestContext,
    Path(video_id): Path<String>,
) -> Response {
    const OP: &str = "PlayHlsIndexEncKey";
    if let Some(denied) = require_play_rights(&state, &ctx, OP, &video_id).await {
        return denied;
    }
    let record = match KeyStore::new(&state.registry, ctx.app())
        .with_request_id(&ctx.request_id)
        .get_by_video_id(&video_id)
        .await
    {
        Ok(record) => record,
        Err(e) => return store_error(&ctx, OP, CODE_QUERY_FAILED, &e),
    };
    match record.key_bytes() {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, KEY_CONTENT_TYPE)
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            error!("[req={}] [{}] stored key is not hex: {}", ctx.request_id, OP, e);
            json_error(500, CODE_GENERATE_FAILED, "stored key is not hex")
        }
    }
}

/// Run the HTTP service until Ctrl-C (for serve command)
pub fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let creds = credentials::load_credentials().map_err(|e| e.to_string())?;
        let registry = StoreRegistry::open(&config, &creds).await?;
        registry.init_schema(None).await?;

        let state = StdArc::new(AppState::new(&config, registry)?);
        let app = build_router(
            state.clone(),
            Duration::from_millis(config.server.request_timeout_ms),
        );

        let addr = config.server_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;
        info!("Listening on http://{}", addr);
        info!("Stores: {:?}", state.registry.store_names());

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
            })
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        state.registry.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn base_url_prefers_forwarded_headers() {
        let h = headers(&[("host", "internal:8080")]);
        assert_eq!(request_base_url(&h), "http://internal:8080");

        let h = headers(&[
            ("host", "internal:8080"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "video.example"),
            ("x-forwarded-port", "8443"),
        ]);
        assert_eq!(request_base_url(&h), "https://video.example:8443");

        let h = headers(&[
            ("x-forwarded-host", "video.example:9000"),
            ("x-forwarded-port", "8443"),
        ]);
        assert_eq!(request_base_url(&h), "http://video.example:9000");
    }

    #[test]
    fn token_from_header_or_cookie() {
        let h = headers(&[("authorization", "Bearer abc")]);
        assert_eq!(bearer_token(&h).as_deref(), Some("abc"));

        let h = headers(&[("cookie", "lang=en; token=xyz")]);
        assert_eq!(bearer_token(&h).as_deref(), Some("xyz"));

        let h = headers(&[("authorization", "Basic a b"), ("cookie", "token=c")]);
        assert_eq!(bearer_token(&h).as_deref(), Some("c"));

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
