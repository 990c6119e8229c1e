//! Server-push event subscriptions keyed by negotiated tokens.
//!
//! A subscription starts life as a configured spec: which channel on
//! which resource, and whom to call. The server assigns the token only
//! after a negotiation request, so the registry keys its active map by
//! token, never by resource/channel. Tokens die with the session; specs
//! survive and are re-negotiated after every reconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Callback invoked with each event's `data` payload
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// A configured subscription: what to negotiate and whom to call
#[derive(Clone)]
pub struct SubscriptionSpec {
    /// Remote resource owning the channel
    pub resource: String,
    /// Channel name negotiated via an ordinary request
    pub channel: String,
    /// Local callback receiving event payloads
    pub callback: EventCallback,
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("resource", &self.resource)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Registry of configured specs and live token mappings
#[derive(Default)]
pub struct SubscriptionRegistry {
    specs: Vec<SubscriptionSpec>,
    active: HashMap<String, EventCallback>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spec for establishment and later re-establishment.
    ///
    /// A spec for the same resource + channel replaces the previous
    /// one, so repeated subscribes do not pile up duplicates.
    pub fn record(&mut self, spec: SubscriptionSpec) {
        match self
            .specs
            .iter_mut()
            .find(|s| s.resource == spec.resource && s.channel == spec.channel)
        {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    /// Install a negotiated token for a recorded spec.
    ///
    /// Returns `false` when no spec matches; the token is then ignored.
    pub fn install(&mut self, token: String, resource: &str, channel: &str) -> bool {
        match self
            .specs
            .iter()
            .find(|s| s.resource == resource && s.channel == channel)
        {
            Some(spec) => {
                self.active.insert(token, spec.callback.clone());
                true
            }
            None => false,
        }
    }

    /// Specs to negotiate on a fresh session
    pub fn specs(&self) -> impl Iterator<Item = &SubscriptionSpec> {
        self.specs.iter()
    }

    /// Dispatch an event to the callback owning the token.
    ///
    /// Returns `false` for unknown tokens, including stale tokens from
    /// a previous session.
    pub fn dispatch(&self, token: &str, data: Value) -> bool {
        match self.active.get(token) {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }

    /// Drop every per-session token mapping
    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    /// Number of live token mappings
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn collecting_spec(resource: &str, channel: &str) -> (SubscriptionSpec, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let spec = SubscriptionSpec {
            resource: resource.to_string(),
            channel: channel.to_string(),
            callback: Arc::new(move |data| sink.lock().unwrap().push(data)),
        };
        (spec, seen)
    }

    #[test]
    fn test_record_replaces_same_resource_and_channel() {
        let mut registry = SubscriptionRegistry::new();
        let (first, _) = collecting_spec("ScenesService", "sceneSwitched");
        let (second, _) = collecting_spec("ScenesService", "sceneSwitched");
        let (other, _) = collecting_spec("SourcesService", "sourceAdded");

        registry.record(first);
        registry.record(second);
        registry.record(other);

        assert_eq!(registry.specs().count(), 2);
    }

    #[test]
    fn test_install_and_dispatch_by_token() {
        let mut registry = SubscriptionRegistry::new();
        let (spec, seen) = collecting_spec("ScenesService", "sceneSwitched");
        registry.record(spec);

        assert!(registry.install("sub-1".to_string(), "ScenesService", "sceneSwitched"));
        assert!(registry.dispatch("sub-1", json!({"name": "sceneB"})));
        assert!(registry.dispatch("sub-1", json!({"name": "sceneA"})));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), [json!({"name": "sceneB"}), json!({"name": "sceneA"})]);
    }

    #[test]
    fn test_install_without_recorded_spec_is_rejected() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.install("sub-1".to_string(), "ScenesService", "sceneSwitched"));
        assert!(!registry.dispatch("sub-1", json!(null)));
    }

    #[test]
    fn test_clear_active_keeps_specs_for_resubscription() {
        let mut registry = SubscriptionRegistry::new();
        let (spec, seen) = collecting_spec("StreamingService", "streamingStatusChange");
        registry.record(spec);
        registry.install("sub-7".to_string(), "StreamingService", "streamingStatusChange");

        registry.clear_active();

        assert_eq!(registry.active_len(), 0);
        assert_eq!(registry.specs().count(), 1);
        assert!(!registry.dispatch("sub-7", json!({"live": true})));
        assert!(seen.lock().unwrap().is_empty());
    }
}
