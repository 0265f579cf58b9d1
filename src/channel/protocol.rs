use serde::Deserialize;

use super::ChannelError;
use crate::domain::DownloadRecord;

/// Messages the server pushes over the real-time channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full replacement of the download list.
    Status {
        #[serde(default)]
        downloads: Vec<DownloadRecord>,
        #[serde(default)]
        global_paused: bool,
    },
    SettingsUpdate {
        #[serde(default)]
        settings: serde_json::Value,
    },
    AuthError {
        #[serde(default, alias = "error")]
        message: String,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Status { .. } => "status",
            ServerMessage::SettingsUpdate { .. } => "settings_update",
            ServerMessage::AuthError { .. } => "auth_error",
        }
    }
}

pub fn parse_message(text: &str) -> Result<ServerMessage, ChannelError> {
    serde_json::from_str(text).map_err(|e| ChannelError::Malformed(e.to_string()))
}
