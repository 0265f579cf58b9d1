use std::collections::HashSet;

use tracing::{debug, info, warn};
use url::Url;

use crate::{
    api::{ApiError, CreateDownloadRequest, ServerClient},
    browser::{BrowserServices, NativeDownload},
    domain::{Cookie, InterceptPolicy, PendingInterceptContext},
    utils::{filename_from_url, is_transient_url, parent_domain},
};

/// Folder value the server reads as "its configured default".
pub const DEFAULT_FOLDER: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptDecision {
    /// Content lives only inside the browser; the server could never fetch it.
    AllowTransient,
    AllowDisabled,
    Intercept,
}

pub fn decide(url: &str, policy: InterceptPolicy) -> InterceptDecision {
    if is_transient_url(url) {
        InterceptDecision::AllowTransient
    } else if !policy.enabled {
        InterceptDecision::AllowDisabled
    } else {
        InterceptDecision::Intercept
    }
}

/// Browser suggestion, else the URL's last path segment, else empty.
pub fn preferred_filename(suggested: Option<&str>, url: &str) -> String {
    suggested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| filename_from_url(url))
}

/// Host cookies first; a parent-domain cookie is kept only if no host
/// cookie has the same name.
pub fn merge_cookies(host: Vec<Cookie>, parent: Vec<Cookie>) -> Vec<Cookie> {
    let mut seen = HashSet::new();
    host.into_iter()
        .chain(parent)
        .filter(|cookie| seen.insert(cookie.name.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Added { filename: String },
    NotConfigured,
    Unauthorized,
    Failed { message: String },
    Unreachable,
}

impl SubmitOutcome {
    fn from_error(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized => SubmitOutcome::Unauthorized,
            ApiError::RequestError(_) => SubmitOutcome::Unreachable,
            ApiError::InvalidResponse(message) => SubmitOutcome::Failed { message },
            other => SubmitOutcome::Failed {
                message: other
                    .server_message()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            },
        }
    }

    pub fn notification(&self) -> (&'static str, String) {
        match self {
            SubmitOutcome::Added { filename } => ("Download added", format!("Added: {}", filename)),
            SubmitOutcome::NotConfigured => (
                "Not configured",
                "Please configure server settings first".to_string(),
            ),
            SubmitOutcome::Unauthorized => ("Authentication failed", "Invalid API key".to_string()),
            SubmitOutcome::Failed { message } => ("Download failed", message.clone()),
            SubmitOutcome::Unreachable => ("Connection failed", "Cannot reach server".to_string()),
        }
    }
}

/// Turns browser-side download intents into server-side downloads.
#[derive(Clone)]
pub struct DownloadCoordinator {
    browser: BrowserServices,
}

impl DownloadCoordinator {
    pub fn new(browser: BrowserServices) -> Self {
        Self { browser }
    }

    /// Cookies for the URL's host and its parent domain. Lookup failures
    /// only cost the cookies, never the download.
    pub async fn gather_cookies(&self, url: &str) -> Vec<Cookie> {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        else {
            return Vec::new();
        };

        let host_cookies = self
            .browser
            .cookies
            .cookies_for_domain(&host)
            .await
            .unwrap_or_else(|e| {
                warn!(host = %host, "cookie lookup failed: {}", e);
                Vec::new()
            });

        let parent_cookies = match parent_domain(&host) {
            Some(parent) => self
                .browser
                .cookies
                .cookies_for_domain(&parent)
                .await
                .unwrap_or_else(|e| {
                    warn!(domain = %parent, "cookie lookup failed: {}", e);
                    Vec::new()
                }),
            None => Vec::new(),
        };

        merge_cookies(host_cookies, parent_cookies)
    }

    pub async fn build_context(
        &self,
        url: &str,
        suggested_filename: Option<&str>,
        folder: &str,
    ) -> PendingInterceptContext {
        PendingInterceptContext {
            url: url.to_string(),
            suggested_filename: preferred_filename(suggested_filename, url),
            folder: folder.to_string(),
            cookies: self.gather_cookies(url).await,
            user_agent: self.browser.user_agent.clone(),
        }
    }

    /// Takes a download away from the browser and hands it to the server.
    /// Call only after [`decide`] returned `Intercept`.
    pub async fn intercept(
        &self,
        item: NativeDownload,
        client: Option<ServerClient>,
    ) -> SubmitOutcome {
        info!(id = item.id, url = %item.url, "intercepting native download");

        // The download may already be gone; forwarding goes ahead regardless
        if let Err(e) = self.browser.downloads.cancel(item.id).await {
            warn!(id = item.id, "failed to cancel native download: {}", e);
        }
        if let Err(e) = self.browser.downloads.erase(item.id).await {
            warn!(id = item.id, "failed to erase native download: {}", e);
        }

        let context = self
            .build_context(&item.url, item.suggested_filename.as_deref(), DEFAULT_FOLDER)
            .await;
        self.submit(&context, client.as_ref()).await
    }

    /// Context menu, popup "add" and folder-picker submissions.
    pub async fn add_download(
        &self,
        url: &str,
        folder: &str,
        filename: Option<&str>,
        client: Option<ServerClient>,
    ) -> SubmitOutcome {
        let context = self.build_context(url, filename, folder).await;
        self.submit(&context, client.as_ref()).await
    }

    /// Sends the creation request once and tells the user how it went.
    pub async fn submit(
        &self,
        context: &PendingInterceptContext,
        client: Option<&ServerClient>,
    ) -> SubmitOutcome {
        let outcome = match client {
            None => {
                warn!(url = %context.url, "cannot add download: not configured");
                SubmitOutcome::NotConfigured
            }
            Some(client) => match client
                .create_download(&CreateDownloadRequest::from(context))
                .await
            {
                Ok(response) => SubmitOutcome::Added {
                    filename: response
                        .filename
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| context.url.clone()),
                },
                Err(e) => {
                    warn!(url = %context.url, "failed to add download: {}", e);
                    SubmitOutcome::from_error(e)
                }
            },
        };

        debug!(?outcome, "submission finished");
        let (title, message) = outcome.notification();
        self.browser.notifier.notify(title, &message);
        outcome
    }
}
