//! Configuration handling for the bridge binary.
//!
//! Reads a YAML file describing one or more control-API connections
//! (the bridge hosts one session per entry) and applies environment
//! variable overrides, so tokens can stay out of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Connections to maintain, one session each
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// One control-API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Session name used as the emitter in notifications
    pub name: String,
    /// Control-API host
    #[serde(default = "default_host")]
    pub host: String,
    /// Control-API port
    #[serde(default = "default_port")]
    pub port: u16,
    /// API token for the reserved auth call
    #[serde(default)]
    pub token: String,
    /// Base unit in seconds for the linear reconnect delay
    #[serde(default = "default_reconnect_base_secs")]
    pub reconnect_base_secs: u64,
    /// Event channels subscribed once the session is ready
    #[serde(default = "default_events")]
    pub events: Vec<EventSpec>,
}

/// One event channel to watch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    /// Remote resource owning the channel
    pub resource: String,
    /// Channel name
    pub channel: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    59650
}

fn default_reconnect_base_secs() -> u64 {
    5
}

/// Channels the bridge watches out of the box
pub fn default_events() -> Vec<EventSpec> {
    [
        ("SceneCollectionsService", "collectionAdded"),
        ("SceneCollectionsService", "collectionRemoved"),
        ("SceneCollectionsService", "collectionSwitched"),
        ("SceneCollectionsService", "collectionUpdated"),
        ("SceneCollectionsService", "collectionWillSwitch"),
        ("ScenesService", "itemAdded"),
        ("ScenesService", "itemRemoved"),
        ("ScenesService", "itemUpdated"),
        ("ScenesService", "sceneAdded"),
        ("ScenesService", "sceneRemoved"),
        ("ScenesService", "sceneSwitched"),
        ("SourcesService", "sourceAdded"),
        ("SourcesService", "sourceRemoved"),
        ("SourcesService", "sourceUpdated"),
        ("StreamingService", "recordingStatusChange"),
        ("StreamingService", "replayBufferStatusChange"),
        ("StreamingService", "streamingStatusChange"),
        ("TransitionsService", "studioModeChanged"),
    ]
    .into_iter()
    .map(|(resource, channel)| EventSpec {
        resource: resource.to_string(),
        channel: channel.to_string(),
    })
    .collect()
}

impl BridgeConfig {
    /// Load configuration from a YAML file and apply env overrides
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading config file {:?}", config_path.as_ref()))?;
        let mut config: BridgeConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {:?}", config_path.as_ref()))?;

        config.apply_environment_overrides();

        if config.connections.is_empty() {
            warn!("configuration lists no connections");
        }
        info!(
            "loaded {} connection(s) from {:?}",
            config.connections.len(),
            config_path.as_ref()
        );
        Ok(config)
    }

    /// Single-connection config built from command-line flags
    pub fn single(connection: ConnectionConfig) -> Self {
        let mut config = Self {
            connections: vec![connection],
        };
        config.apply_environment_overrides();
        config
    }

    /// Apply `CASTBRIDGE_*` environment overrides.
    ///
    /// The token override only fills connections that have none
    /// configured; host and port overrides apply to every connection.
    fn apply_environment_overrides(&mut self) {
        if let Ok(token) = std::env::var("CASTBRIDGE_TOKEN") {
            for connection in self.connections.iter_mut().filter(|c| c.token.is_empty()) {
                info!("token for {} taken from environment", connection.name);
                connection.token = token.clone();
            }
        }

        if let Ok(host) = std::env::var("CASTBRIDGE_HOST") {
            for connection in self.connections.iter_mut() {
                connection.host = host.clone();
            }
            info!("host overridden by environment: {}", host);
        }

        if let Ok(port) = std::env::var("CASTBRIDGE_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    for connection in self.connections.iter_mut() {
                        connection.port = port;
                    }
                    info!("port overridden by environment: {}", port);
                }
                Err(_) => warn!("ignoring unparsable CASTBRIDGE_PORT: {}", port),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
connections:
  - name: studio-main
    host: 10.0.0.5
    port: 59651
    token: main-token
    reconnect_base_secs: 2
    events:
      - resource: ScenesService
        channel: sceneSwitched
  - name: studio-backup
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.connections.len(), 2);

        let main = &config.connections[0];
        assert_eq!(main.name, "studio-main");
        assert_eq!(main.host, "10.0.0.5");
        assert_eq!(main.port, 59651);
        assert_eq!(main.token, "main-token");
        assert_eq!(main.reconnect_base_secs, 2);
        assert_eq!(main.events.len(), 1);
        assert_eq!(main.events[0].channel, "sceneSwitched");

        // omitted fields fall back to the defaults
        let backup = &config.connections[1];
        assert_eq!(backup.host, "127.0.0.1");
        assert_eq!(backup.port, 59650);
        assert_eq!(backup.reconnect_base_secs, 5);
        assert_eq!(backup.events.len(), default_events().len());
    }

    #[test]
    fn test_default_events_cover_core_services() {
        let events = default_events();
        assert!(events
            .iter()
            .any(|e| e.resource == "ScenesService" && e.channel == "sceneSwitched"));
        assert!(events
            .iter()
            .any(|e| e.resource == "StreamingService" && e.channel == "streamingStatusChange"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(BridgeConfig::load_from_file("/nonexistent/castbridge.yaml").is_err());
    }
}
