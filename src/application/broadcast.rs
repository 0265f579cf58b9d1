use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{ConnectionState, DownloadRecord};

const EVENT_BUFFER: usize = 64;

/// Pushed to every attached observer. Observers that attach later call
/// [`BroadcastHub::snapshot`] instead of expecting a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    DownloadsUpdated {
        downloads: Vec<DownloadRecord>,
        global_paused: bool,
    },
    SettingsUpdated {
        settings: serde_json::Value,
    },
    ConnectionStatusChanged {
        connected: bool,
        state: ConnectionState,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub downloads: Vec<DownloadRecord>,
    pub global_paused: bool,
    pub connection: ConnectionState,
    pub connected: bool,
    pub settings: Option<serde_json::Value>,
}

/// Last known server state plus a best-effort topic for observers.
pub struct BroadcastHub {
    downloads: Vec<DownloadRecord>,
    global_paused: bool,
    connection: ConnectionState,
    settings: Option<serde_json::Value>,
    events: broadcast::Sender<HubEvent>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            downloads: Vec::new(),
            global_paused: false,
            connection: ConnectionState::Disconnected,
            settings: None,
            events,
        }
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Cloneable publisher, for handing out subscriptions from other tasks.
    pub fn sender(&self) -> broadcast::Sender<HubEvent> {
        self.events.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            downloads: self.downloads.clone(),
            global_paused: self.global_paused,
            connection: self.connection,
            connected: self.connection.is_connected(),
            settings: self.settings.clone(),
        }
    }

    pub fn downloads(&self) -> &[DownloadRecord] {
        &self.downloads
    }

    pub fn global_paused(&self) -> bool {
        self.global_paused
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn any_active(&self) -> bool {
        self.downloads.iter().any(DownloadRecord::is_active)
    }

    /// Replaces the whole snapshot and fans it out. Returns whether any
    /// download is transferring.
    pub fn apply_status(&mut self, downloads: Vec<DownloadRecord>, global_paused: bool) -> bool {
        debug!(count = downloads.len(), global_paused, "download snapshot replaced");
        self.downloads = downloads;
        self.global_paused = global_paused;
        self.publish(HubEvent::DownloadsUpdated {
            downloads: self.downloads.clone(),
            global_paused,
        });
        self.any_active()
    }

    pub fn apply_settings(&mut self, settings: serde_json::Value) {
        self.settings = Some(settings.clone());
        self.publish(HubEvent::SettingsUpdated { settings });
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
        self.publish(HubEvent::ConnectionStatusChanged {
            connected: state.is_connected(),
            state,
        });
    }

    fn publish(&self, event: HubEvent) {
        // No observers attached is the common case (popup closed)
        if self.events.send(event).is_err() {
            debug!("no observers attached, event dropped");
        }
    }
}
