//! Upstream trait for the code-hosting API.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::instance::{Credentials, Instance};
use crate::types::{AccessToken, CreatePullRequest};

/// Calls made against the hosting service.
///
/// Every REST call returns `Ok(None)` when the service answers with an empty
/// success body.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Exchange credentials for a bearer token (OAuth password grant).
    async fn exchange_token(&self, credentials: &Credentials) -> Result<AccessToken>;

    /// Create a pull request.
    async fn create_pull(
        &self,
        instance: &Instance,
        token: &str,
        request: &CreatePullRequest,
    ) -> Result<Option<Value>>;

    /// Mark a pull request as reviewed.
    async fn review_pull(
        &self,
        instance: &Instance,
        token: &str,
        number: u64,
        force: bool,
    ) -> Result<Option<Value>>;

    /// Mark a pull request as tested.
    async fn test_pull(
        &self,
        instance: &Instance,
        token: &str,
        number: u64,
        force: bool,
    ) -> Result<Option<Value>>;

    /// Merge a pull request.
    async fn merge_pull(&self, instance: &Instance, token: &str, number: u64)
        -> Result<Option<Value>>;
}
