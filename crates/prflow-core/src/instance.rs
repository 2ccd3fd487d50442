//! Configured repository instances and the registry that resolves them.
//!
//! An [`Instance`] is one repository target with its own credentials, branches
//! and workflow flags. Instances are built once from configuration and never
//! change afterwards, so the registry hands out plain shared references.

use std::fmt;

use crate::{Error, Result};

/// OAuth scope requested by the password-grant exchange.
pub const OAUTH_SCOPE: &str = "user_info projects pull_requests";

/// Wrap a raw branch name into its display form `branch (<name>)`.
///
/// Names that already look like `branch (...)` (case-insensitive) are returned
/// unchanged, which makes the function idempotent. The display form is only
/// used in human-readable text; the raw name is what goes upstream.
pub fn format_branch(raw: &str) -> String {
    const PREFIX: &str = "branch (";

    let already_formatted = raw.len() > PREFIX.len()
        && raw.is_char_boundary(PREFIX.len())
        && raw[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
        && raw.ends_with(')');

    if already_formatted {
        raw.to_string()
    } else {
        format!("branch ({})", raw)
    }
}

/// Derive the stable instance key from a repository id.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, so the key is safe to
/// use as a tool-name prefix.
pub fn instance_key(repo: &str) -> String {
    repo.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// OAuth password-grant credentials of one instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: OAUTH_SCOPE.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// One configured repository target.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Stable key derived from `repo`
    pub key: String,
    /// Repository owner (user or organization path)
    pub owner: String,
    /// Repository id
    pub repo: String,
    /// Source branch, raw form
    pub head: String,
    /// Target branch, raw form
    pub base: String,
    /// Source branch, display form
    pub head_display: String,
    /// Target branch, display form
    pub base_display: String,
    /// Comma-separated reviewer usernames
    pub reviewers: Option<String>,
    /// Comma-separated tester usernames
    pub testers: Option<String>,
    /// Comma-separated labels
    pub labels: Option<String>,
    pub auto_review: bool,
    pub auto_test: bool,
    pub auto_merge: bool,
    pub credentials: Credentials,
}

impl Instance {
    /// Create an instance with no optional lists and all workflow flags off.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        head: impl Into<String>,
        base: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        let repo = repo.into();
        let head = head.into();
        let base = base.into();
        Self {
            key: instance_key(&repo),
            owner: owner.into(),
            head_display: format_branch(&head),
            base_display: format_branch(&base),
            repo,
            head,
            base,
            reviewers: None,
            testers: None,
            labels: None,
            auto_review: false,
            auto_test: false,
            auto_merge: false,
            credentials,
        }
    }

    /// Set the three workflow flags.
    pub fn with_flags(mut self, auto_review: bool, auto_test: bool, auto_merge: bool) -> Self {
        self.auto_review = auto_review;
        self.auto_test = auto_test;
        self.auto_merge = auto_merge;
        self
    }

    /// `owner/repo` path used in upstream URLs and log lines.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Registry of configured instances, in configuration order.
///
/// The first instance is the active one: its key prefixes tool names when more
/// than one instance is configured, and it is the default target of a call
/// that names no `repo`.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    instances: Vec<Instance>,
}

impl InstanceRegistry {
    /// Build the registry. Fails on an empty list or duplicate keys.
    pub fn new(instances: Vec<Instance>) -> Result<Self> {
        if instances.is_empty() {
            return Err(Error::Config("No instances configured".to_string()));
        }

        for (idx, instance) in instances.iter().enumerate() {
            if instances[..idx].iter().any(|other| other.key == instance.key) {
                return Err(Error::Config(format!(
                    "Duplicate instance key '{}' (repo '{}')",
                    instance.key, instance.repo
                )));
            }
        }

        Ok(Self { instances })
    }

    /// Resolve an instance by key.
    pub fn resolve(&self, key: &str) -> Result<&Instance> {
        self.instances
            .iter()
            .find(|instance| instance.key == key)
            .ok_or_else(|| Error::InstanceNotFound(key.to_string()))
    }

    /// The active instance.
    pub fn default_instance(&self) -> &Instance {
        &self.instances[0]
    }

    /// Whether more than one instance is configured.
    pub fn is_multi(&self) -> bool {
        self.instances.len() > 1
    }

    pub fn keys(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.key.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
