//! Session error types.

use serde_json::Value;
use thiserror::Error;

/// Errors delivered through a call's result channel.
///
/// Every failure reaches exactly the caller that issued the request;
/// nothing is thrown asynchronously into unrelated code.
#[derive(Error, Debug, PartialEq)]
pub enum RpcError {
    /// `call()` issued while the session is not `Ready`; nothing was sent
    #[error("not connected")]
    NotConnected,

    /// The transport closed before a correlated response arrived
    #[error("connection lost")]
    ConnectionLost,

    /// Well-formed response carrying an `error` payload, passed verbatim
    #[error("remote error: {0}")]
    Remote(Value),

    /// The session manager task is gone
    #[error("session closed")]
    SessionClosed,
}
