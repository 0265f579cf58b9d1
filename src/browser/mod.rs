//! Seams to the browser APIs the agent drives but does not own: the native
//! download list, the cookie jar, notifications, the toolbar button and the
//! short-lived cross-context store.

pub mod headless;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AppError, Cookie};
use crate::icon::IconImage;

/// A download the browser just created on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeDownload {
    pub id: u64,
    pub url: String,
    /// Filename the browser proposed (from Content-Disposition or the page).
    #[serde(default)]
    pub suggested_filename: Option<String>,
}

/// A click on the "Download with NAS" context menu entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMenuClick {
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub src_url: Option<String>,
}

impl ContextMenuClick {
    pub fn target_url(&self) -> Option<&str> {
        self.link_url
            .as_deref()
            .or(self.src_url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[async_trait]
pub trait NativeDownloads: Send + Sync {
    async fn cancel(&self, id: u64) -> Result<(), AppError>;
    /// Removes the entry from the browser's download list.
    async fn erase(&self, id: u64) -> Result<(), AppError>;
}

#[async_trait]
pub trait CookieJar: Send + Sync {
    async fn cookies_for_domain(&self, domain: &str) -> Result<Vec<Cookie>, AppError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub text: &'static str,
    pub color: &'static str,
}

impl Badge {
    pub const CONNECTED: Badge = Badge {
        text: "",
        color: "#10b981",
    };
    pub const DISCONNECTED: Badge = Badge {
        text: "!",
        color: "#ef4444",
    };

    pub fn for_connection(connected: bool) -> Badge {
        if connected {
            Badge::CONNECTED
        } else {
            Badge::DISCONNECTED
        }
    }
}

pub trait Toolbar: Send + Sync {
    fn set_badge(&self, badge: &Badge);
    fn set_icon(&self, icon: &IconImage);
}

/// Short-lived key-value storage shared between the agent and its observers.
pub trait PendingStore: Send + Sync {
    fn set_pending_download_url(&self, url: String);
    /// Returns the URL at most once.
    fn take_pending_download_url(&self) -> Option<String>;
}

/// Everything the agent needs from the browser, bundled for cheap cloning
/// into spawned tasks.
#[derive(Clone)]
pub struct BrowserServices {
    pub downloads: Arc<dyn NativeDownloads>,
    pub cookies: Arc<dyn CookieJar>,
    pub notifier: Arc<dyn Notifier>,
    pub toolbar: Arc<dyn Toolbar>,
    pub pending: Arc<dyn PendingStore>,
    pub user_agent: String,
}
