use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Credentials file structure
///
/// Format:
/// ```toml
/// [postgres.profile_name]
/// password = "your_postgres_password_here"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub postgres: HashMap<String, CredentialProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialProfile {
    pub password: String,
}

/// Default credentials file path: ~/.config/stream_vault/credentials.toml
pub fn get_credentials_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("stream_vault")
            .join("credentials.toml"),
    )
}

/// Load credentials from the default location.
/// Returns None if the file doesn't exist.
pub fn load_credentials() -> Result<Option<Credentials>, Box<dyn std::error::Error + Send + Sync>> {
    let Some(creds_path) = get_credentials_path() else {
        return Ok(None);
    };
    if !creds_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&creds_path)?;
    Ok(Some(parse_credentials(&content)?))
}

pub fn parse_credentials(content: &str) -> Result<Credentials, toml::de::Error> {
    toml::from_str(content)
}

/// PostgreSQL password for a profile
pub fn postgres_password(credentials: &Option<Credentials>, profile: &str) -> Result<String, String> {
    match credentials {
        Some(creds) => creds
            .postgres
            .get(profile)
            .map(|p| p.password.clone())
            .ok_or_else(|| {
                format!(
                    "Credential profile '[postgres.{}]' not found in credentials file",
                    profile
                )
            }),
        None => Err(format!(
            "Credentials file not found. Expected at: {}",
            get_credentials_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "$HOME/.config/stream_vault/credentials.toml".to_string())
        )),
    }
}
