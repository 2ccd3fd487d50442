//! Transport layer for MCP JSON-RPC communication.
//!
//! MCP uses newline-delimited JSON over stdin/stdout.

use std::io;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    JSONRPC_VERSION,
};

/// Message that can be received from the client.
#[derive(Debug)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// A record that is not a valid envelope
    Malformed {
        id: RequestId,
        /// Method name, when one could be extracted
        method: Option<String>,
        error: JsonRpcError,
    },
}

/// Classify one line of input.
///
/// The presence of an `id` key makes a request; its absence a notification.
pub fn parse_message(line: &str) -> IncomingMessage {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return IncomingMessage::Malformed {
                id: RequestId::Null,
                method: None,
                error: JsonRpcError::parse_error(&e.to_string()),
            }
        }
    };

    let Value::Object(mut object) = value else {
        return IncomingMessage::Malformed {
            id: RequestId::Null,
            method: None,
            error: JsonRpcError::invalid_request("message must be a JSON object"),
        };
    };

    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);

    let id = match object.remove("id") {
        None => None,
        Some(raw) => match serde_json::from_value::<RequestId>(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                return IncomingMessage::Malformed {
                    id: RequestId::Null,
                    method,
                    error: JsonRpcError::invalid_request(
                        "id must be a string, a number or null",
                    ),
                }
            }
        },
    };

    let malformed = |message: &str| IncomingMessage::Malformed {
        id: id.clone().unwrap_or(RequestId::Null),
        method: method.clone(),
        error: JsonRpcError::invalid_request(message),
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return malformed("jsonrpc must be \"2.0\"");
    }
    let Some(method_name) = method.clone() else {
        return malformed("method must be a string");
    };
    let params = object.remove("params");

    match id {
        Some(id) => IncomingMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method_name,
            params,
        }),
        None => IncomingMessage::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method_name,
            params,
        }),
    }
}

/// Transport for reading/writing JSON-RPC messages.
pub struct StdioTransport {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl StdioTransport {
    /// Create a transport using stdin/stdout.
    pub fn stdio() -> Self {
        Self {
            reader: Box::new(BufReader::new(tokio::io::stdin())),
            writer: Box::new(tokio::io::stdout()),
        }
    }

    /// Create a transport with custom reader/writer.
    pub fn new(
        reader: Box<dyn AsyncBufRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self { reader, writer }
    }

    /// Read the next message, skipping blank lines.
    ///
    /// Returns `Ok(None)` at end of input.
    pub async fn read_message(&mut self) -> io::Result<Option<IncomingMessage>> {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if self.reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(None);
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!("Received non UTF-8 line: {}", e);
                    return Ok(Some(IncomingMessage::Malformed {
                        id: RequestId::Null,
                        method: None,
                        error: JsonRpcError::parse_error("input is not valid UTF-8"),
                    }));
                }
            };
            if line.is_empty() {
                continue;
            }

            tracing::debug!("Received: {}", line);
            let message = parse_message(line);
            if let IncomingMessage::Malformed { error, .. } = &message {
                tracing::warn!("Malformed message: {}", error.message);
            }
            return Ok(Some(message));
        }
    }

    /// Write a JSON-RPC response to the transport.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let mut json = serde_json::to_string(response).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Serialization error: {}", e))
        })?;

        tracing::debug!("Sending: {}", json);

        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn transport(input: &str) -> StdioTransport {
        StdioTransport::new(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(tokio::io::sink()),
        )
    }

    #[tokio::test]
    async fn test_read_request() {
        let mut transport =
            transport("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"test\",\"params\":{}}\n");

        match transport.read_message().await.unwrap() {
            Some(IncomingMessage::Request(req)) => {
                assert_eq!(req.method, "test");
                assert_eq!(req.id, RequestId::Number(1.into()));
                assert_eq!(req.params, Some(serde_json::json!({})));
            }
            other => panic!("Expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_notification() {
        let mut transport =
            transport("{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n");

        match transport.read_message().await.unwrap() {
            Some(IncomingMessage::Notification(notif)) => {
                assert_eq!(notif.method, "notifications/initialized");
            }
            other => panic!("Expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_lines_skipped() {
        let mut transport =
            transport("\n   \n\r\n{\"jsonrpc\":\"2.0\",\"id\":\"a\",\"method\":\"ping\"}");

        match transport.read_message().await.unwrap() {
            Some(IncomingMessage::Request(req)) => assert_eq!(req.method, "ping"),
            other => panic!("Expected request, got {:?}", other),
        }
        assert!(transport.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_eof() {
        let mut transport = transport("");
        assert!(transport.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_response() {
        let (client, server) = tokio::io::duplex(1024);
        let mut transport = StdioTransport::new(Box::new(tokio::io::empty()), Box::new(server));

        let response =
            JsonRpcResponse::success(RequestId::Number(1.into()), serde_json::json!({"test": true}));
        transport.write_response(&response).await.unwrap();
        drop(transport);

        let mut lines = BufReader::new(client).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":1,"result":{"test":true}}"#);
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[test]
    fn test_parse_error() {
        match parse_message("{not json") {
            IncomingMessage::Malformed { id, method, error } => {
                assert_eq!(id, RequestId::Null);
                assert!(method.is_none());
                assert_eq!(error.code, JsonRpcError::PARSE_ERROR);
            }
            other => panic!("Expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_is_invalid_request() {
        for line in ["[1,2]", "42", "\"ping\""] {
            match parse_message(line) {
                IncomingMessage::Malformed { id, error, .. } => {
                    assert_eq!(id, RequestId::Null);
                    assert_eq!(error.code, JsonRpcError::INVALID_REQUEST);
                }
                other => panic!("Expected malformed, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_any_numeric_id_is_accepted() {
        for raw in ["18446744073709551615", "2.5"] {
            let line = format!(r#"{{"jsonrpc":"2.0","id":{},"method":"ping"}}"#, raw);
            match parse_message(&line) {
                IncomingMessage::Request(req) => {
                    assert_eq!(serde_json::to_string(&req.id).unwrap(), raw);
                }
                other => panic!("Expected request, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        match parse_message(r#"{"jsonrpc":"1.0","id":9,"method":"ping"}"#) {
            IncomingMessage::Malformed { id, method, error } => {
                assert_eq!(id, RequestId::Number(9.into()));
                assert_eq!(method.as_deref(), Some("ping"));
                assert_eq!(error.code, JsonRpcError::INVALID_REQUEST);
            }
            other => panic!("Expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_method() {
        match parse_message(r#"{"jsonrpc":"2.0","id":"x"}"#) {
            IncomingMessage::Malformed { id, error, .. } => {
                assert_eq!(id, RequestId::String("x".to_string()));
                assert_eq!(error.code, JsonRpcError::INVALID_REQUEST);
            }
            other => panic!("Expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_id_type() {
        match parse_message(r#"{"jsonrpc":"2.0","id":{"a":1},"method":"ping"}"#) {
            IncomingMessage::Malformed { id, error, .. } => {
                assert_eq!(id, RequestId::Null);
                assert_eq!(error.code, JsonRpcError::INVALID_REQUEST);
            }
            other => panic!("Expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_null_id_is_request() {
        assert!(matches!(
            parse_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#),
            IncomingMessage::Request(JsonRpcRequest { id: RequestId::Null, .. })
        ));
    }
}
