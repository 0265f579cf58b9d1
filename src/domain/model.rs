use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::AppError;

/// Lifecycle of the real-time channel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Server rejected the API key. Terminal until credentials change.
    AuthFailed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Server address and API key used for both the channel and commands.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub server_address: Url,
    pub api_key: String,
}

impl ServerCredentials {
    pub fn new(server_address: &str, api_key: &str) -> Result<Self, AppError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AppError::InvalidInput("API key is empty".to_string()));
        }

        let server_address = Url::parse(server_address.trim().trim_end_matches('/'))
            .map_err(|e| AppError::InvalidInput(format!("Invalid server address: {}", e)))?;
        if !matches!(server_address.scheme(), "http" | "https") {
            return Err(AppError::InvalidInput(format!(
                "Server address must start with http:// or https://, got {}",
                server_address.scheme()
            )));
        }

        Ok(Self {
            server_address,
            api_key: api_key.to_string(),
        })
    }

    /// `http(s)://host/base` becomes `ws(s)://host/base/ws?api_key=...`
    pub fn channel_url(&self) -> Url {
        let mut url = self.server_address.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http -> ws and https -> wss are both allowed scheme swaps
        let _ = url.set_scheme(scheme);

        let path = format!("{}/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(Some(&format!(
            "api_key={}",
            urlencoding::encode(&self.api_key)
        )));
        url
    }

    /// Channel URL with the key masked, for logs.
    pub fn redacted_channel_url(&self) -> String {
        let mut url = self.channel_url();
        url.set_query(Some("api_key=***"));
        url.to_string()
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("server_address", &self.server_address.as_str())
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, rename = "speed_bps")]
    pub speed_bytes_per_sec: u64,
    #[serde(default)]
    pub eta_seconds: u64,
}

/// A download as last reported by the server. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub folder: String,
    pub status: DownloadStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub progress: DownloadProgress,
}

impl DownloadRecord {
    pub fn is_active(&self) -> bool {
        self.status == DownloadStatus::Downloading
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptPolicy {
    pub enabled: bool,
}

impl Default for InterceptPolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
}

impl Cookie {
    #[cfg(test)]
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
        }
    }
}

/// Everything the server needs to repeat a request the browser was about to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInterceptContext {
    pub url: String,
    pub suggested_filename: String,
    pub folder: String,
    pub cookies: Vec<Cookie>,
    pub user_agent: String,
}
