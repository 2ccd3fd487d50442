//! Gitee upstream implementation for prflow.
//!
//! This crate talks to the Gitee OAuth endpoint and the pull-request
//! endpoints of the v5 REST API.

mod client;
mod types;

pub use client::GiteeClient;
