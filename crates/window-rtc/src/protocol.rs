//! Channel contract and JSON-RPC 2.0 framing between windows and the hub
//!
//! Every request/response invocation and every one-way notification that
//! crosses the transport is framed as a JSON-RPC 2.0 message whose `method`
//! is one of the four logical [`Channel`] names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Logical channels multiplexed over one addressable transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Free-form log line, window -> hub -> all windows
    #[serde(rename = "window-rtc:log")]
    Log,
    /// Signaling envelope, request form (window -> hub) and push form (hub -> window)
    #[serde(rename = "window-rtc:signal")]
    Signal,
    /// Resolve the caller's registered name
    #[serde(rename = "window-rtc:registered-window:own-name")]
    GetOwnWindowName,
    /// Snapshot of registered names
    #[serde(rename = "window-rtc:registered-windows:get")]
    GetRegisteredWindows,
}

impl Channel {
    /// All channels, in binding order
    pub const ALL: [Channel; 4] = [
        Channel::Log,
        Channel::Signal,
        Channel::GetOwnWindowName,
        Channel::GetRegisteredWindows,
    ];

    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Log => "window-rtc:log",
            Channel::Signal => "window-rtc:signal",
            Channel::GetOwnWindowName => "window-rtc:registered-window:own-name",
            Channel::GetRegisteredWindows => "window-rtc:registered-windows:get",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| Error::Transport(format!("Unknown channel: {}", s)))
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Channel name
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: serde_json::Value,

    /// Request ID for matching with response (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: serde_json::Value,

    /// Request ID this response corresponds to
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Reply to a request, either a result or an error.
///
/// The error form is tried first since a success reply never carries `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcReply {
    Error(JsonRpcError),
    Result(JsonRpcResponse),
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Registry-specific error codes

    /// Name or handle already registered
    pub const DUPLICATE_NAME: i32 = -32000;

    /// Calling endpoint has no registry entry
    pub const SELF_NOT_REGISTERED: i32 = -32001;
}

impl JsonRpcRequest {
    /// Create a request expecting a reply
    pub fn new(channel: Channel, params: serde_json::Value, id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: channel.as_str().to_string(),
            params,
            id: Some(id),
        }
    }

    /// Create a notification (no reply)
    pub fn notification(channel: Channel, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: channel.as_str().to_string(),
            params,
            id: None,
        }
    }

    /// Resolve the method name to a channel
    pub fn channel(&self) -> Result<Channel> {
        self.method.parse()
    }

    /// Check if this is a notification
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Convert request to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC request: {}", e))
        })
    }

    /// Parse request from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize JSON-RPC request: {}", e))
        })?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(Error::SerializationError(format!(
                "Unsupported JSON-RPC version: {}",
                request.jsonrpc
            )));
        }
        Ok(request)
    }
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn new(result: serde_json::Value, id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }
}

impl JsonRpcError {
    /// Create an error response
    pub fn new(code: i32, message: impl Into<String>, id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
            id,
        }
    }

    /// Build the error response for a failed handler
    pub fn from_error(err: &Error, id: serde_json::Value) -> Self {
        Self::new(error_code_for(err), err.to_string(), id)
    }
}

impl JsonRpcReply {
    /// Convert reply to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC reply: {}", e))
        })
    }

    /// Parse reply from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize JSON-RPC reply: {}", e))
        })
    }

    /// Unwrap the result, turning an error reply into a crate error
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self {
            JsonRpcReply::Result(response) => Ok(response.result),
            JsonRpcReply::Error(err) => Err(err.error.into()),
        }
    }
}

impl From<ErrorObject> for Error {
    fn from(err: ErrorObject) -> Self {
        match err.code {
            error_codes::SELF_NOT_REGISTERED => Error::SelfNotRegistered,
            error_codes::INVALID_PARAMS | error_codes::PARSE_ERROR => {
                Error::SerializationError(err.message)
            }
            code => Error::Remote {
                code,
                message: err.message,
            },
        }
    }
}

fn error_code_for(err: &Error) -> i32 {
    match err {
        Error::SerializationError(_) => error_codes::INVALID_PARAMS,
        Error::DuplicateName(_) | Error::InvalidName(_) => error_codes::DUPLICATE_NAME,
        Error::NotRegistered | Error::SelfNotRegistered => error_codes::SELF_NOT_REGISTERED,
        _ => error_codes::INTERNAL_ERROR,
    }
}
