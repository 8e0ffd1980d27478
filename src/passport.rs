//! Play-rights gate backed by the external passport service.

use log::{error, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::config::PassportConfig;

/// Body of the play-rights endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayRightsResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: PlayRightsData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRightsData {
    #[serde(default)]
    pub has_permission: bool,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub video_id: String,
}

impl PlayRightsResponse {
    pub fn granted(&self) -> bool {
        self.status == "ok" && self.data.has_permission
    }
}

#[derive(Debug, Clone)]
pub struct PassportClient {
    client: Client,
    /// Full URL of the play-rights endpoint, without query
    rights_url: Option<String>,
}

impl PassportClient {
    /// A client without endpoint denies every request
    pub fn new(config: Option<&PassportConfig>) -> Result<Self, reqwest::Error> {
        let timeout = config.map(|c| c.timeout_ms).unwrap_or(5000);
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout))
            .build()?;
        let rights_url = config
            .filter(|c| !c.endpoint.is_empty())
            .map(|c| rights_url(&c.endpoint, &c.play_rights_api));
        Ok(Self { client, rights_url })
    }

    /// Ask the passport service whether `token` may play `video_id`.
    ///
    /// Anything but an HTTP 200 with `status == "ok"` and `data.hasPermission` denies.
    pub async fn check_play_rights(&self, token: Option<&str>, video_id: &str, request_id: &str) -> bool {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            warn!("[req={}] [CheckPlayRights] no access token, video={}", request_id, video_id);
            return false;
        };
        let Some(base) = &self.rights_url else {
            error!("[req={}] [CheckPlayRights] passport endpoint not configured", request_id);
            return false;
        };
        let url = format!("{}?video_id={}", base, urlencoding::encode(video_id));

        let resp = match self.client.get(&url).bearer_auth(token).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!("[req={}] [CheckPlayRights] passport request failed: {}", request_id, e);
                return false;
            }
        };
        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                error!("[req={}] [CheckPlayRights] reading passport response failed: {}", request_id, e);
                return false;
            }
        };
        if status != StatusCode::OK {
            warn!(
                "[req={}] [CheckPlayRights] passport returned {}: {}",
                request_id, status, body
            );
            return false;
        }
        let parsed: PlayRightsResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(
                    "[req={}] [CheckPlayRights] bad passport response: {}, body: {}",
                    request_id, e, body
                );
                return false;
            }
        };
        if parsed.status != "ok" {
            warn!(
                "[req={}] [CheckPlayRights] passport status={} msg={}",
                request_id, parsed.status, parsed.msg
            );
            return false;
        }
        if !parsed.granted() {
            warn!(
                "[req={}] [CheckPlayRights] no play rights for video={} reason={}",
                request_id, video_id, parsed.data.reason
            );
        }
        parsed.granted()
    }
}

fn rights_url(endpoint: &str, api: &str) -> String {
    let api = if api.is_empty() { "/api/get-user-play-rights" } else { api };
    let endpoint = endpoint.trim_end_matches('/');
    if api.starts_with('/') {
        format!("{}{}", endpoint, api)
    } else {
        format!("{}/{}", endpoint, api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rights_url_joins_slashes() {
        assert_eq!(
            rights_url("http://passport/", "api/rights"),
            "http://passport/api/rights"
        );
        assert_eq!(
            rights_url("http://passport", ""),
            "http://passport/api/get-user-play-rights"
        );
    }

    #[test]
    fn grant_requires_ok_and_permission() {
        let body = r#"{"status":"ok","msg":"","data":{"hasPermission":true,"videoId":"v1"}}"#;
        let parsed: PlayRightsResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.granted());

        let body = r#"{"status":"error","data":{"hasPermission":true}}"#;
        let parsed: PlayRightsResponse = serde_json::from_str(body).unwrap();
        assert!(!parsed.granted());

        let parsed: PlayRightsResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(!parsed.granted());
    }

    #[tokio::test]
    async fn missing_token_or_endpoint_denies() {
        let client = PassportClient::new(None).unwrap();
        assert!(!client.check_play_rights(Some("t"), "v1", "req").await);
        let config = PassportConfig {
            endpoint: "http://127.0.0.1:9".into(),
            play_rights_api: "/rights".into(),
            timeout_ms: 200,
        };
        let client = PassportClient::new(Some(&config)).unwrap();
        assert!(!client.check_play_rights(None, "v1", "req").await);
        assert!(!client.check_play_rights(Some(""), "v1", "req").await);
    }
}
