use serde::{Deserialize, Serialize};

use super::broadcast::Snapshot;
use crate::domain::{ConnectionState, DownloadRecord};

/// Requests observers (popup, options page) send to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalRequest {
    GetConnectionStatus,
    GetDownloads,
    GetSnapshot,
    AddDownload {
        url: String,
        #[serde(default)]
        folder: String,
        #[serde(default)]
        filename: Option<String>,
    },
    PauseDownload {
        id: String,
    },
    ResumeDownload {
        id: String,
    },
    CancelDownload {
        id: String,
        #[serde(default)]
        delete_file: Option<bool>,
    },
    PauseAllDownloads,
    ResumeAllDownloads,
    InterceptSettingChanged {
        enabled: bool,
    },
    /// The options page saved new settings; reload and reconnect.
    SettingsUpdated,
    /// "Download to folder": park the URL for the next observer to pick up.
    DownloadToFolder {
        url: String,
    },
    TakePendingDownload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LocalResponse {
    ConnectionStatus {
        connected: bool,
        state: ConnectionState,
    },
    Downloads {
        downloads: Vec<DownloadRecord>,
        global_paused: bool,
    },
    Snapshot(Snapshot),
    PendingDownload {
        url: Option<String>,
    },
    Ack {
        success: bool,
    },
}

impl LocalResponse {
    pub fn ack(success: bool) -> Self {
        LocalResponse::Ack { success }
    }
}
