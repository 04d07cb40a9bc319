use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::credentials::CredentialProvider;
use crate::descriptor::AccessResponse;
use crate::error::AccessError;

/// Access descriptor together with the HTTP status it came with.
#[derive(Debug, Clone)]
pub struct AccessReply {
    pub status: StatusCode,
    pub body: AccessResponse,
}

impl AccessReply {
    pub fn ok(body: AccessResponse) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }
}

/// Source of access descriptors.
#[async_trait]
pub trait AccessClient: Send + Sync {
    async fn fetch_access(&self, book_id: u64) -> Result<AccessReply, AccessError>;
}

/// Fetches descriptors from `{api_url}books/{id}/access`.
pub struct HttpAccessClient {
    client: Client,
    api_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpAccessClient {
    pub fn new(
        api_url: Url,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, AccessError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url,
            credentials,
        })
    }
}

#[async_trait]
impl AccessClient for HttpAccessClient {
    async fn fetch_access(&self, book_id: u64) -> Result<AccessReply, AccessError> {
        let url = self
            .api_url
            .join(&format!("books/{book_id}/access"))
            .map_err(|e| AccessError::Transport(format!("invalid API URL: {e}")))?;

        let mut request = self.client.get(url);
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AccessError::Unauthorized);
        }

        // Error statuses usually still carry a JSON body worth classifying.
        let text = resp.text().await?;
        match serde_json::from_str::<AccessResponse>(&text) {
            Ok(body) => Ok(AccessReply { status, body }),
            Err(_) if status == StatusCode::NOT_FOUND => Ok(AccessReply {
                status,
                body: AccessResponse::default(),
            }),
            Err(e) if status.is_success() => Err(AccessError::Malformed(e.to_string())),
            Err(_) => Err(AccessError::Transport(format!(
                "access request failed with status {status}"
            ))),
        }
    }
}
