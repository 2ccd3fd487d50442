//! MCP (Model Context Protocol) server for prflow.
//!
//! This crate implements the MCP server that exposes the pull-request workflow
//! to AI assistants over newline-delimited JSON-RPC on stdin/stdout.

pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use handlers::ToolHandler;
pub use server::{McpServer, SessionState};
pub use tools::{ToolKind, ToolRegistry};
pub use transport::{IncomingMessage, StdioTransport};
