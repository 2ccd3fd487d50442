//! Common types shared between the upstream client and the workflow.

use serde::{Deserialize, Serialize, Serializer};

/// Default token lifetime when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl AccessToken {
    /// Lifetime in seconds, falling back to one hour.
    pub fn lifetime_secs(&self) -> u64 {
        self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
    }
}

/// Body of the create-pull-request call.
///
/// List fields are sent as comma-separated strings and left out entirely when
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreatePullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub draft: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "comma_list"
    )]
    pub assignees: Option<Vec<String>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "comma_list"
    )]
    pub testers: Option<Vec<String>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "comma_list"
    )]
    pub labels: Option<Vec<String>>,
}

fn comma_list<S: Serializer>(
    value: &Option<Vec<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(items) => serializer.serialize_str(&items.join(",")),
        None => serializer.serialize_none(),
    }
}
