use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Hard limit for documents uploaded through `POST /api/session`.
pub const MAX_FILE_SIZE: usize = 2 * 1024 * 1024;

/// Hard limit for a staged file uploaded over SFTP.
pub const MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// Largest SFTP packet accepted from a client.
pub const SFTP_PACKET_LIMIT: u32 = 10 * 1024 * 1024;

/// Largest HTTP request body accepted by the API server.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Application configuration
///
/// Loaded from a TOML file and overridable per key through uppercase
/// environment variables of the same name (list values are comma separated).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// SSH listener host
    #[serde(default = "default_ssh_host")]
    pub ssh_host: String,

    /// SSH listener port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Path to the Ed25519 host key
    #[serde(default = "default_ssh_private_key_path")]
    pub ssh_private_key_path: String,

    /// Use the password allow-list instead of accepting any public key
    #[serde(default)]
    pub ssh_password_auth: bool,

    /// Accepted passwords when `ssh_password_auth` is on
    #[serde(default)]
    pub ssh_allowed_passwords: Vec<String>,

    /// HTTP listener host
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// HTTP listener port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Requests per minute allowed on the API group
    #[serde(default = "default_api_rpm")]
    pub api_rpm: u64,

    /// Require `X-API-Key` on API routes
    #[serde(default)]
    pub api_key_auth: bool,

    /// Accepted API keys
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Root directory for staged uploads
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    /// Public base URLs used to build edit links
    #[serde(default = "default_server_urls")]
    pub server_urls: Vec<String>,

    /// Hours an empty editing session may idle before it is reaped
    #[serde(default = "default_session_timeout_hours")]
    pub session_timeout_hours: u64,

    /// Directory holding the built frontend assets
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults plus environment variables
    /// make a complete configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))?
        } else {
            info!("no config file at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Requests-per-minute cap with the documented floor of 2.
    pub fn api_rpm(&self) -> u64 {
        self.api_rpm.max(2)
    }

    /// Full SSH listener address
    pub fn ssh_address(&self) -> String {
        format!("{}:{}", self.ssh_host, self.ssh_port)
    }

    /// Full HTTP listener address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_string("SSH_HOST", &mut self.ssh_host);
        override_parsed("SSH_PORT", &mut self.ssh_port)?;
        override_string("SSH_PRIVATE_KEY_PATH", &mut self.ssh_private_key_path);
        override_parsed("SSH_PASSWORD_AUTH", &mut self.ssh_password_auth)?;
        override_list("SSH_ALLOWED_PASSWORDS", &mut self.ssh_allowed_passwords);
        override_string("API_HOST", &mut self.api_host);
        override_parsed("API_PORT", &mut self.api_port)?;
        override_parsed("API_RPM", &mut self.api_rpm)?;
        override_parsed("API_KEY_AUTH", &mut self.api_key_auth)?;
        override_list("API_KEYS", &mut self.api_keys);
        override_string("UPLOADS_DIR", &mut self.uploads_dir);
        override_list("SERVER_URLS", &mut self.server_urls);
        override_parsed("SESSION_TIMEOUT_HOURS", &mut self.session_timeout_hours)?;
        override_string("STATIC_DIR", &mut self.static_dir);
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_host: default_ssh_host(),
            ssh_port: default_ssh_port(),
            ssh_private_key_path: default_ssh_private_key_path(),
            ssh_password_auth: false,
            ssh_allowed_passwords: Vec::new(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            api_rpm: default_api_rpm(),
            api_key_auth: false,
            api_keys: Vec::new(),
            uploads_dir: default_uploads_dir(),
            server_urls: default_server_urls(),
            session_timeout_hours: default_session_timeout_hours(),
            static_dir: default_static_dir(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, #[source] toml::de::Error),
    #[error("invalid value for {0}: {1}")]
    Env(&'static str, String),
}

fn override_string(key: &'static str, slot: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *slot = value;
    }
}

fn override_list(key: &'static str, slot: &mut Vec<String>) {
    if let Ok(value) = std::env::var(key) {
        *slot = value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

fn override_parsed<T>(key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
{
    if let Ok(value) = std::env::var(key) {
        *slot = value
            .parse()
            .map_err(|_| ConfigError::Env(key, value.clone()))?;
    }
    Ok(())
}

// Default value functions
fn default_ssh_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ssh_port() -> u16 {
    2222
}

fn default_ssh_private_key_path() -> String {
    "ssh_host_key".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_rpm() -> u64 {
    120
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_server_urls() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_session_timeout_hours() -> u64 {
    24
}

fn default_static_dir() -> String {
    "web/dist".to_string()
}
