//! Collaborators for running the agent outside a browser: native download
//! calls and UI surfaces become log lines, storage lives in memory.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Badge, BrowserServices, CookieJar, NativeDownloads, Notifier, PendingStore, Toolbar};
use crate::domain::{AppError, Cookie};
use crate::icon::IconImage;

pub struct LogDownloads;

#[async_trait]
impl NativeDownloads for LogDownloads {
    async fn cancel(&self, id: u64) -> Result<(), AppError> {
        info!(id, "native download cancelled");
        Ok(())
    }

    async fn erase(&self, id: u64) -> Result<(), AppError> {
        info!(id, "native download erased");
        Ok(())
    }
}

/// Cookie jar with a fixed set of cookies, matched by exact domain.
#[derive(Default)]
pub struct StaticCookieJar {
    cookies: Vec<Cookie>,
}

impl StaticCookieJar {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }
}

#[async_trait]
impl CookieJar for StaticCookieJar {
    async fn cookies_for_domain(&self, domain: &str) -> Result<Vec<Cookie>, AppError> {
        Ok(self
            .cookies
            .iter()
            .filter(|cookie| cookie.domain.trim_start_matches('.') == domain)
            .cloned()
            .collect())
    }
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(title, "notification: {}", message);
    }
}

pub struct LogToolbar;

impl Toolbar for LogToolbar {
    fn set_badge(&self, badge: &Badge) {
        debug!(text = badge.text, color = badge.color, "badge updated");
    }

    fn set_icon(&self, icon: &IconImage) {
        debug!(width = icon.width, height = icon.height, "icon updated");
    }
}

#[derive(Default)]
pub struct MemoryPendingStore {
    url: Mutex<Option<String>>,
}

impl PendingStore for MemoryPendingStore {
    fn set_pending_download_url(&self, url: String) {
        if let Ok(mut slot) = self.url.lock() {
            *slot = Some(url);
        }
    }

    fn take_pending_download_url(&self) -> Option<String> {
        self.url.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl BrowserServices {
    pub fn headless(user_agent: String, cookies: Vec<Cookie>) -> Self {
        Self {
            downloads: Arc::new(LogDownloads),
            cookies: Arc::new(StaticCookieJar::new(cookies)),
            notifier: Arc::new(LogNotifier),
            toolbar: Arc::new(LogToolbar),
            pending: Arc::new(MemoryPendingStore::default()),
            user_agent,
        }
    }
}
