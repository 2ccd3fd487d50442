//! Core traits, types, and error handling for prflow.
//!
//! This crate provides the foundational abstractions used across all prflow components:
//! the instance registry, the upstream API trait, configuration and the shared error type.

pub mod config;
pub mod error;
pub mod instance;
pub mod types;
pub mod upstream;

pub use config::Config;
pub use error::{Error, Result};
pub use instance::{format_branch, instance_key, Credentials, Instance, InstanceRegistry};
pub use types::{AccessToken, CreatePullRequest};
pub use upstream::Upstream;
