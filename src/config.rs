use clap::ValueEnum;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_CDN, PLAYER_TRANSPORT_KEY, PLAYER_TRANSPORT_NONCE};

/// Default config file location when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "./app.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// SQLite file (or `:memory:`)
    Sqlite,
    /// PostgreSQL server; the database is created on first connect
    Postgres,
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_max_connections() -> u32 {
    5
}

fn default_play_rights_api() -> String {
    "/api/get-user-play-rights".to_string()
}

fn default_passport_timeout_ms() -> u64 {
    5000
}

/// Top-level configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Backing stores by logical name (`stream`, `stream_<app>`, ...)
    #[serde(default)]
    pub database: HashMap<String, DatabaseConfig>,
    /// CDN bases by region; `default` is used for segment URLs
    #[serde(default)]
    pub cdn: HashMap<String, CdnConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for a whole request, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// One backing store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    /// SQLite database file, or `:memory:`
    pub path: Option<PathBuf>,
    /// Base PostgreSQL URL without password and database (e.g. postgres://user@host:5432)
    pub url: Option<String>,
    /// PostgreSQL database name
    pub database: Option<String>,
    /// Profile in the credentials file holding the PostgreSQL password
    pub credential_profile: Option<String>,
    /// Prefix prepended to every physical table name
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Maximum lifetime of a pooled connection in seconds (0 = pool default)
    #[serde(default)]
    pub max_lifetime_secs: u64,
    /// Log every statement at info level
    #[serde(default)]
    pub log_sql: bool,
    /// Shard counts per logical table
    #[serde(default)]
    pub table_config: Vec<TableConfig>,
}

impl DatabaseConfig {
    /// Shard count of a logical table, 0 when not configured
    pub fn sharding_num(&self, table_name: &str) -> u32 {
        self.table_config
            .iter()
            .find(|t| t.table_name == table_name)
            .map(|t| t.sharding_num)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub table_name: String,
    pub sharding_num: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdnConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub passport: Option<PassportConfig>,
}

/// Identity service answering play-rights questions
#[derive(Debug, Clone, Deserialize)]
pub struct PassportConfig {
    pub endpoint: String,
    #[serde(default = "default_play_rights_api")]
    pub play_rights_api: String,
    #[serde(default = "default_passport_timeout_ms")]
    pub timeout_ms: u64,
}

/// Overrides for the private player protocol transport key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerConfig {
    pub key_hex: Option<String>,
    pub nonce_hex: Option<String>,
}

impl PlayerConfig {
    /// Transport key and GCM nonce, falling back to the embedded ones
    pub fn transport_key_and_nonce(&self) -> Result<(Vec<u8>, Vec<u8>), String> {
        let key = match &self.key_hex {
            Some(h) => hex::decode(h).map_err(|e| format!("player.key_hex is not hex: {}", e))?,
            None => PLAYER_TRANSPORT_KEY.to_vec(),
        };
        let nonce = match &self.nonce_hex {
            Some(h) => {
                hex::decode(h).map_err(|e| format!("player.nonce_hex is not hex: {}", e))?
            }
            None => PLAYER_TRANSPORT_NONCE.to_vec(),
        };
        if ![16, 24, 32].contains(&key.len()) {
            return Err(format!(
                "player.key_hex must decode to 16, 24 or 32 bytes, got {}",
                key.len()
            ));
        }
        if nonce.len() != 12 {
            return Err(format!(
                "player.nonce_hex must decode to 12 bytes, got {}",
                nonce.len()
            ));
        }
        Ok((key, nonce))
    }
}

impl AppConfig {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| format!("Invalid config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        let config: AppConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every configured store can be opened and the player overrides decode
    pub fn validate(&self) -> Result<(), String> {
        if self.database.is_empty() {
            return Err("at least one [database.<name>] section is required".to_string());
        }
        for (name, db) in &self.database {
            match db.backend {
                DatabaseBackend::Sqlite => {
                    if db.path.is_none() {
                        return Err(format!("database.{}: sqlite backend requires 'path'", name));
                    }
                }
                DatabaseBackend::Postgres => {
                    if db.url.is_none() || db.database.is_none() {
                        return Err(format!(
                            "database.{}: postgres backend requires 'url' and 'database'",
                            name
                        ));
                    }
                }
            }
            if db.max_connections == 0 {
                return Err(format!("database.{}: max_connections must be > 0", name));
            }
        }
        self.player.transport_key_and_nonce()?;
        Ok(())
    }

    /// Deployment-wide CDN base, without a trailing slash
    pub fn default_cdn_url(&self) -> Option<&str> {
        self.cdn
            .get(DEFAULT_CDN)
            .map(|c| c.url.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.ip, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
port = 9000

[database.stream]
backend = "sqlite"
path = ":memory:"

[[database.stream.table_config]]
table_name = "video_ts"
sharding_num = 8

[cdn.default]
url = "https://cdn.example/"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.ip, "0.0.0.0");
        assert_eq!(config.server.request_timeout_ms, 2000);
        let db = &config.database["stream"];
        assert_eq!(db.sharding_num("video_ts"), 8);
        assert_eq!(db.sharding_num("video_encrypt"), 0);
        assert_eq!(config.default_cdn_url(), Some("https://cdn.example"));
        assert!(config.auth.passport.is_none());
    }

    #[test]
    fn rejects_missing_database() {
        let err = AppConfig::from_toml("[server]\nport = 1\n").unwrap_err();
        assert!(err.contains("database"));
    }

    #[test]
    fn rejects_postgres_without_database_name() {
        let content = "[database.stream]\nbackend = \"postgres\"\nurl = \"postgres://u@h\"\n";
        assert!(AppConfig::from_toml(content).is_err());
    }

    #[test]
    fn player_override_must_be_valid_gcm_material() {
        let content = format!("{}\n[player]\nnonce_hex = \"0011\"\n", SAMPLE);
        assert!(AppConfig::from_toml(&content).is_err());

        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let (key, nonce) = config.player.transport_key_and_nonce().unwrap();
        assert_eq!(key, PLAYER_TRANSPORT_KEY.to_vec());
        assert_eq!(nonce, PLAYER_TRANSPORT_NONCE.to_vec());
    }
}
