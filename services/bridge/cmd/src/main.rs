//! Castbridge binary.
//!
//! Hosts one reconnecting control-API session per configured
//! connection, establishes the configured event subscriptions once each
//! session is ready, and relays lifecycle notifications and event
//! payloads to the log. The event-bus side of the bridge plugs in where
//! this binary logs.

use bridge_session::transport::ws::WsTransport;
use bridge_session::{
    EventCallback, Lifecycle, Notification, SessionConfig, SessionHandle, SessionManager,
};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{BridgeConfig, ConnectionConfig, EventSpec};
use logging::BridgeLogFormatter;

/// Bridge between a studio's control API and an automation host
#[derive(Parser, Debug)]
#[command(
    name = "castbridge",
    version,
    about = "JSON-RPC control-API bridge with automatic reconnect"
)]
struct Args {
    /// Path to the YAML configuration file (replaces the ad-hoc flags)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control-API host for an ad-hoc single connection
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Control-API port for an ad-hoc single connection
    #[arg(long, default_value_t = 59650)]
    port: u16,

    /// API token for an ad-hoc single connection
    #[arg(long, default_value = "")]
    token: String,

    /// Session name used as the emitter in notifications
    #[arg(long, default_value = "studio")]
    name: String,

    /// Base unit for the linear reconnect delay, e.g. 5s
    #[arg(long, default_value = "5s")]
    reconnect_base: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct HostedSession {
    handle: SessionHandle,
    events: Vec<EventSpec>,
    subscribed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = match &args.config {
        Some(path) => BridgeConfig::load_from_file(path)?,
        None => BridgeConfig::single(ConnectionConfig {
            name: args.name.clone(),
            host: args.host.clone(),
            port: args.port,
            token: args.token.clone(),
            reconnect_base_secs: args.reconnect_base.as_secs(),
            events: config::default_events(),
        }),
    };
    anyhow::ensure!(!config.connections.is_empty(), "no connections configured");

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let mut sessions: HashMap<String, HostedSession> = HashMap::new();

    for connection in &config.connections {
        let session_config = SessionConfig {
            name: connection.name.clone(),
            endpoint: bridge_session::Endpoint {
                host: connection.host.clone(),
                port: connection.port,
            },
            token: connection.token.clone(),
            base_delay: Duration::from_secs(connection.reconnect_base_secs),
        };

        let manager = SessionManager::new(session_config, WsTransport, notify_tx.clone());
        let handle = manager.handle();
        tokio::spawn(manager.run());
        handle.start();

        sessions.insert(
            connection.name.clone(),
            HostedSession {
                handle,
                events: connection.events.clone(),
                subscribed: false,
            },
        );
    }
    drop(notify_tx);

    info!("bridging {} session(s)", sessions.len());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                for hosted in sessions.values() {
                    hosted.handle.stop();
                }
                break;
            }

            maybe = notify_rx.recv() => {
                match maybe {
                    Some(notification) => handle_notification(&mut sessions, notification).await,
                    None => break,
                }
            }
        }
    }

    Ok(())
}

async fn handle_notification(
    sessions: &mut HashMap<String, HostedSession>,
    notification: Notification,
) {
    let hosted = match sessions.get_mut(&notification.session) {
        Some(hosted) => hosted,
        None => return,
    };

    match notification.lifecycle {
        Lifecycle::Load => {
            info!(session = %notification.session, "session loading");
        }
        Lifecycle::Open => {
            info!(session = %notification.session, "session open");
            if !hosted.subscribed {
                // only once; the manager re-negotiates recorded
                // subscriptions itself after every reconnect
                hosted.subscribed = true;
                establish_subscriptions(&notification.session, hosted).await;
            }
        }
        Lifecycle::Close => match notification.detail {
            Some(detail) => warn!(session = %notification.session, "session closed: {}", detail),
            None => warn!(session = %notification.session, "session closed"),
        },
        Lifecycle::Unload => {
            info!(session = %notification.session, "session unloaded");
        }
    }
}

async fn establish_subscriptions(session: &str, hosted: &HostedSession) {
    for spec in &hosted.events {
        let emitter = session.to_string();
        let resource = spec.resource.clone();
        let channel = spec.channel.clone();
        let callback: EventCallback = Arc::new(move |data| {
            info!(session = %emitter, "{}.{}: {}", resource, channel, data);
        });

        match hosted
            .handle
            .subscribe(&spec.resource, &spec.channel, callback)
            .await
        {
            Ok(token) => {
                debug!(session = %session, "watching {}.{} ({})", spec.resource, spec.channel, token);
            }
            Err(e) => {
                warn!(session = %session, "subscribe {}.{} failed: {}", spec.resource, spec.channel, e);
            }
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(BridgeLogFormatter::new("castbridge".to_string()))
        .init();
}
