use reqwest::{Client, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::models::{
    CreateDownloadRequest, CreateDownloadResponse, DownloadAction, ErrorResponse,
    MutateDownloadRequest,
};
use crate::domain::ServerCredentials;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Invalid API key")]
    Unauthorized,

    #[error("Server returned HTTP {status}")]
    Server {
        status: u16,
        message: Option<String>,
    },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Server-provided message, falling back to `HTTP <status>`.
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Server {
                message: Some(message),
                ..
            } => Some(message.clone()),
            ApiError::Server { status, .. } => Some(format!("HTTP {}", status)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Authenticated client for the server's command interface.
#[derive(Clone)]
pub struct ServerClient {
    http: Client,
    credentials: ServerCredentials,
}

impl ServerClient {
    pub fn new(credentials: ServerCredentials) -> Self {
        Self {
            http: Client::new(),
            credentials,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/api/{}",
            self.credentials.server_address.as_str().trim_end_matches('/'),
            path
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.credentials.api_key)
    }

    /// 401 maps to `Unauthorized`, other failures carry the body's `error` field.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .ok()
            .and_then(|body| body.error);
        Err(ApiError::Server {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn create_download(
        &self,
        request: &CreateDownloadRequest,
    ) -> Result<CreateDownloadResponse> {
        debug!(url = %request.url, folder = %request.folder, "creating download");
        let response = self
            .authorized(self.http.post(self.endpoint("downloads")))
            .json(request)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("JSON decode error: {}", e)))
    }

    pub async fn mutate_download(&self, id: &str, action: DownloadAction) -> Result<()> {
        debug!(id, ?action, "mutating download");
        let response = self
            .authorized(
                self.http
                    .patch(self.endpoint(&format!("downloads/{}", urlencoding::encode(id)))),
            )
            .json(&MutateDownloadRequest { action })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `delete_file: None` leaves the choice to the server (it removes
    /// incomplete files only).
    pub async fn delete_download(&self, id: &str, delete_file: Option<bool>) -> Result<()> {
        debug!(id, ?delete_file, "deleting download");
        let mut request = self.authorized(
            self.http
                .delete(self.endpoint(&format!("downloads/{}", urlencoding::encode(id)))),
        );
        if let Some(delete_file) = delete_file {
            request = request.query(&[("delete_file", delete_file)]);
        }
        Self::check(request.send().await?).await?;
        Ok(())
    }

    pub async fn pause_all(&self) -> Result<()> {
        let response = self
            .authorized(self.http.post(self.endpoint("downloads/pause-all")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn resume_all(&self) -> Result<()> {
        let response = self
            .authorized(self.http.post(self.endpoint("downloads/resume-all")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
