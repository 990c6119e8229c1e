//! JSON-RPC wire shapes for the control-API bridge.
//!
//! This crate defines the message shapes exchanged with the remote
//! control API: outbound requests, inbound responses, and the envelope
//! the server wraps around pushed events. One JSON object travels per
//! transport frame; framing itself is the transport's problem.
//!
//! ## Wire Format
//!
//! ```text
//! request:  {"jsonrpc":"2.0","id":7,"method":"getScenes",
//!            "params":{"resource":"ScenesService","args":[]}}
//! response: {"id":7,"result":...}   |   {"id":7,"error":...}
//! event:    {"id":null,"result":{"_type":"EVENT","emitter":"STREAM",
//!            "resourceId":"<token>","data":...}}
//! ```
//!
//! Result and error payloads are server-defined and carried opaquely as
//! [`serde_json::Value`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;

// Re-export main types
pub use error::WireError;
pub use frame::{
    decode_frame, subscription_token, token_key, EventEnvelope, Request, RequestParams,
    ServerFrame, AUTH_METHOD, AUTH_RESOURCE, EVENT_TYPE, JSONRPC_VERSION,
};
