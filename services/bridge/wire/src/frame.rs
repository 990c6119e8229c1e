//! Request encoding and response/event decoding.
//!
//! Requests are serialized to the exact shape the remote control API
//! expects. Inbound frames decode into [`ServerFrame`], which is either
//! a correlated response (by `id`) or, when the `result` carries the
//! event discriminator, a server-push [`EventEnvelope`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;

/// JSON-RPC protocol version sent with every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Discriminator value marking a `result` as a pushed event
pub const EVENT_TYPE: &str = "EVENT";

/// Resource addressed by the reserved authentication call
pub const AUTH_RESOURCE: &str = "TcpServerService";

/// Method name of the reserved authentication call
pub const AUTH_METHOD: &str = "auth";

/// One remote procedure invocation.
///
/// Ids are assigned by the session at send time and are unique among
/// all currently pending requests.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    /// Correlation id
    pub id: u64,
    /// Operation name on the target resource
    pub method: String,
    /// Target resource and positional arguments
    pub params: RequestParams,
}

/// Parameter block of a [`Request`]
#[derive(Debug, Clone, Serialize)]
pub struct RequestParams {
    /// Remote target object/namespace
    pub resource: String,
    /// Positional arguments, opaque to the bridge
    pub args: Vec<Value>,
}

impl Request {
    /// Build a request for `method` on `resource`
    pub fn new(id: u64, resource: &str, method: &str, args: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params: RequestParams {
                resource: resource.to_string(),
                args,
            },
        }
    }

    /// Serialize to one wire frame
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("request encoding should never fail")
    }
}

/// One frame received from the server.
///
/// Presence of `error` marks a failed response; its payload is
/// server-defined and passed through opaquely. Frames without an `id`
/// are either event envelopes or noise on a multiplexed channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    /// Correlation id of the request this responds to, if any
    #[serde(default)]
    pub id: Option<u64>,
    /// Success payload or event envelope
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload, shape defined by the server
    #[serde(default)]
    pub error: Option<Value>,
}

impl ServerFrame {
    /// Interpret the `result` as a server-push event envelope.
    ///
    /// Recognized solely by `_type == "EVENT"`; anything else is an
    /// ordinary response payload.
    pub fn as_event(&self) -> Option<EventEnvelope> {
        let result = self.result.as_ref()?;
        if result.get("_type")?.as_str()? != EVENT_TYPE {
            return None;
        }
        serde_json::from_value(result.clone()).ok()
    }
}

/// Envelope the server wraps around pushed events
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    /// Envelope discriminator, `"EVENT"` for pushed events
    #[serde(rename = "_type")]
    pub kind: String,
    /// Remote emitter label
    #[serde(default)]
    pub emitter: Option<String>,
    /// Subscription token negotiated earlier
    #[serde(rename = "resourceId")]
    pub resource_id: Value,
    /// Payload handed to the subscriber callback
    #[serde(default)]
    pub data: Value,
}

/// Decode one inbound frame.
///
/// Callers are expected to log and discard the error case; the channel
/// may legitimately carry frames the bridge does not own.
pub fn decode_frame(text: &str) -> Result<ServerFrame, WireError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(WireError::Malformed);
    }
    Ok(serde_json::from_value(value)?)
}

/// Normalize a subscription token to a map key.
///
/// Servers hand tokens back as strings or numbers; both forms must
/// land on the same key so event lookup works either way.
pub fn token_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the subscription token from a negotiation result
pub fn subscription_token(result: &Value) -> Option<String> {
    result.get("resourceId").and_then(token_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::new(7, "ScenesService", "getScenes", Vec::new());
        let encoded: Value = serde_json::from_str(&request.encode()).unwrap();

        assert_eq!(
            encoded,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "getScenes",
                "params": {"resource": "ScenesService", "args": []}
            })
        );
    }

    #[test]
    fn test_request_carries_args_in_order() {
        let request = Request::new(
            3,
            "SelectionService",
            "moveTo",
            vec![json!("scene-1"), json!(null)],
        );
        let encoded: Value = serde_json::from_str(&request.encode()).unwrap();

        assert_eq!(encoded["params"]["args"], json!(["scene-1", null]));
        assert_eq!(encoded["method"], "moveTo");
    }

    #[test]
    fn test_decode_success_response() {
        let frame = decode_frame(r#"{"id":7,"result":["sceneA","sceneB"]}"#).unwrap();
        assert_eq!(frame.id, Some(7));
        assert_eq!(frame.result, Some(json!(["sceneA", "sceneB"])));
        assert!(frame.error.is_none());
    }

    #[test]
    fn test_decode_error_response() {
        let frame = decode_frame(r#"{"id":7,"error":{"message":"not found"}}"#).unwrap();
        assert_eq!(frame.id, Some(7));
        assert_eq!(frame.error, Some(json!({"message": "not found"})));
    }

    #[test]
    fn test_decode_rejects_non_object_frames() {
        assert!(decode_frame("[1,2,3]").is_err());
        assert!(decode_frame("not json at all").is_err());
        assert!(decode_frame(r#"{"id":"seven"}"#).is_err());
    }

    #[test]
    fn test_event_envelope_recognition() {
        let frame = decode_frame(
            r#"{"id":null,"result":{"_type":"EVENT","emitter":"STREAM","resourceId":"sub-1","data":{"name":"sceneB"}}}"#,
        )
        .unwrap();

        let event = frame.as_event().expect("event envelope");
        assert_eq!(event.kind, EVENT_TYPE);
        assert_eq!(event.resource_id, json!("sub-1"));
        assert_eq!(event.data, json!({"name": "sceneB"}));
    }

    #[test]
    fn test_plain_results_are_not_events() {
        let frame = decode_frame(r#"{"id":4,"result":{"_type":"HELPER","resourceId":"x"}}"#).unwrap();
        assert!(frame.as_event().is_none());

        let frame = decode_frame(r#"{"id":4,"result":["a","b"]}"#).unwrap();
        assert!(frame.as_event().is_none());
    }

    #[test]
    fn test_envelope_without_token_is_not_an_event() {
        let frame =
            decode_frame(r#"{"id":null,"result":{"_type":"EVENT","data":{}}}"#).unwrap();
        assert!(frame.as_event().is_none());
    }

    #[test]
    fn test_token_normalization() {
        assert_eq!(token_key(&json!("sub-9")), Some("sub-9".to_string()));
        assert_eq!(token_key(&json!(42)), Some("42".to_string()));
        assert_eq!(token_key(&json!({"nested": true})), None);
        assert_eq!(token_key(&json!(null)), None);
    }

    #[test]
    fn test_subscription_token_extraction() {
        assert_eq!(
            subscription_token(&json!({"resourceId": "sceneSwitched-1"})),
            Some("sceneSwitched-1".to_string())
        );
        assert_eq!(subscription_token(&json!({"other": 1})), None);
    }

    #[test]
    fn test_request_response_roundtrip() {
        let request = Request::new(11, "ScenesService", "getScenes", Vec::new());
        let wire = request.encode();
        let echoed: Value = serde_json::from_str(&wire).unwrap();

        let reply = json!({"id": echoed["id"], "result": ["sceneA", "sceneB"]}).to_string();
        let frame = decode_frame(&reply).unwrap();

        assert_eq!(frame.id, Some(11));
        assert_eq!(frame.result, Some(json!(["sceneA", "sceneB"])));
    }
}
