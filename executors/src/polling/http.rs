use relay_core::error::RelayError;
use reqwest::Url;

use super::status::{RelayerResponse, StatusCheckRequest, StatusChecker};

/// Asks a relayer service over HTTP, one JSON POST per check
#[derive(Clone)]
pub struct HttpStatusChecker {
    client: reqwest::Client,
    url: Url,
}

impl HttpStatusChecker {
    pub fn new(url: &str) -> Result<Self, RelayError> {
        let url = url.parse().map_err(|e| RelayError::Relayer {
            message: format!("invalid relayer url {url}: {e}"),
            status: None,
            body: None,
        })?;
        Ok(Self::with_client(reqwest::Client::new(), url))
    }

    pub fn with_client(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

impl StatusChecker for HttpStatusChecker {
    async fn check_status(&self, operation_id: &str) -> Result<RelayerResponse, RelayError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&StatusCheckRequest::new(operation_id))
            .send()
            .await
            .map_err(|e| RelayError::Network {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(RelayError::Relayer {
                message: format!("status check returned HTTP {status}"),
                status: Some(status.as_u16()),
                body,
            });
        }

        response
            .json::<RelayerResponse>()
            .await
            .map_err(|e| RelayError::Relayer {
                message: format!("invalid status check response: {e}"),
                status: Some(status.as_u16()),
                body: None,
            })
    }
}
