//! Gitee request and error-body types.

use serde::{Deserialize, Serialize};

/// Form body of the password-grant exchange.
#[derive(Debug, Serialize)]
pub struct PasswordGrantForm<'a> {
    pub grant_type: &'static str,
    pub username: &'a str,
    pub password: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub scope: &'a str,
}

/// Body of the review and test calls.
#[derive(Debug, Serialize)]
pub struct ForceRequest {
    pub force: bool,
}

/// Error body returned by Gitee on failure.
///
/// The OAuth endpoint uses `error_description`, the REST API uses `message`.
#[derive(Debug, Default, Deserialize)]
pub struct GiteeErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl GiteeErrorBody {
    /// Most descriptive message available.
    pub fn into_message(self) -> Option<String> {
        self.message.or(self.error_description).or(self.error)
    }
}
