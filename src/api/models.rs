use serde::{Deserialize, Serialize};

use crate::domain::{Cookie, PendingInterceptContext};

/// Body of `POST /api/downloads`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateDownloadRequest {
    pub url: String,
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub user_agent: String,
    pub cookies: Vec<Cookie>,
}

impl From<&PendingInterceptContext> for CreateDownloadRequest {
    fn from(context: &PendingInterceptContext) -> Self {
        let filename = Some(context.suggested_filename.clone()).filter(|name| !name.is_empty());
        Self {
            url: context.url.clone(),
            folder: context.folder.clone(),
            filename,
            user_agent: context.user_agent.clone(),
            cookies: context.cookies.clone(),
        }
    }
}

/// Response from `POST /api/downloads`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateDownloadResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    Pause,
    Resume,
}

/// Body of `PATCH /api/downloads/{id}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MutateDownloadRequest {
    pub action: DownloadAction,
}

/// Error body the server attaches to non-2xx responses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
}
