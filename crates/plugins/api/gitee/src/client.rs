//! Gitee API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use prflow_core::{AccessToken, CreatePullRequest, Credentials, Error, Instance, Result, Upstream};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{ForceRequest, GiteeErrorBody, PasswordGrantForm};

/// Gitee API client.
///
/// One client serves every configured instance; the repository and bearer
/// token are passed per call.
pub struct GiteeClient {
    base_url: String,
    client: reqwest::Client,
}

impl GiteeClient {
    /// Create a client with a custom base URL and request timeout.
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("prflow")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Get the pull-request API URL of an instance for a given endpoint.
    fn pulls_url(&self, instance: &Instance, endpoint: &str) -> String {
        format!(
            "{}/api/v5/repos/{}/{}/pulls{}",
            self.base_url, instance.owner, instance.repo, endpoint
        )
    }

    /// Send a request and read its body.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<(u16, Option<Value>)> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", url, e)))?;

        self.handle_response(response).await
    }

    /// Map error statuses; an empty success body becomes `None`.
    async fn handle_response(&self, response: reqwest::Response) -> Result<(u16, Option<Value>)> {
        let status = response.status();
        let status_code = status.as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GiteeErrorBody>(&text)
                .ok()
                .and_then(GiteeErrorBody::into_message)
                .unwrap_or(text);
            warn!(
                status = status_code,
                message = %message,
                "Gitee API error response"
            );
            return Err(Error::from_status(status_code, message));
        }

        if text.trim().is_empty() {
            return Ok((status_code, None));
        }

        let value = serde_json::from_str(&text).map_err(|e| {
            Error::from_status(status_code, format!("invalid JSON in response: {}", e))
        })?;
        Ok((status_code, Some(value)))
    }

    async fn post_force(
        &self,
        instance: &Instance,
        token: &str,
        number: u64,
        endpoint: &str,
        force: bool,
    ) -> Result<Option<Value>> {
        let url = self.pulls_url(instance, &format!("/{}/{}", number, endpoint));
        debug!(url = %url, force, "Gitee POST request");

        let request = self
            .client
            .post(&url)
            .query(&[("access_token", token)])
            .json(&ForceRequest { force });
        let (_, body) = self.send(request, &url).await?;
        Ok(body)
    }
}

#[async_trait]
impl Upstream for GiteeClient {
    async fn exchange_token(&self, credentials: &Credentials) -> Result<AccessToken> {
        let url = format!("{}/oauth/token", self.base_url);
        debug!(url = %url, username = %credentials.username, "Gitee token exchange");

        let form = PasswordGrantForm {
            grant_type: "password",
            username: &credentials.username,
            password: &credentials.password,
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            scope: &credentials.scope,
        };
        let (status, body) = self.send(self.client.post(&url).form(&form), &url).await?;

        let body = body.ok_or_else(|| Error::from_status(status, "Empty token response"))?;
        let token: AccessToken = serde_json::from_value(body)
            .map_err(|e| Error::from_status(status, format!("Invalid token response: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(Error::from_status(status, "Token response without access_token"));
        }

        Ok(token)
    }

    async fn create_pull(
        &self,
        instance: &Instance,
        token: &str,
        request: &CreatePullRequest,
    ) -> Result<Option<Value>> {
        let url = self.pulls_url(instance, "");
        debug!(url = %url, head = %request.head, base = %request.base, "Gitee POST request");

        let builder = self
            .client
            .post(&url)
            .query(&[("access_token", token)])
            .json(request);
        let (_, body) = self.send(builder, &url).await?;
        Ok(body)
    }

    async fn review_pull(
        &self,
        instance: &Instance,
        token: &str,
        number: u64,
        force: bool,
    ) -> Result<Option<Value>> {
        self.post_force(instance, token, number, "review", force).await
    }

    async fn test_pull(
        &self,
        instance: &Instance,
        token: &str,
        number: u64,
        force: bool,
    ) -> Result<Option<Value>> {
        self.post_force(instance, token, number, "test", force).await
    }

    async fn merge_pull(
        &self,
        instance: &Instance,
        token: &str,
        number: u64,
    ) -> Result<Option<Value>> {
        let url = self.pulls_url(instance, &format!("/{}/merge", number));
        debug!(url = %url, "Gitee PUT request");

        let request = self.client.put(&url).query(&[("access_token", token)]);
        let (_, body) = self.send(request, &url).await?;
        Ok(body)
    }
}
