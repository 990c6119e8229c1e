//! Drives a session against an in-process peer standing in for the
//! control API: answers the auth call, serves one request, then pushes
//! an event on a negotiated subscription.

use std::sync::Arc;
use std::time::Duration;

use bridge_session::transport::memory::{MemoryPeer, MemoryTransport};
use bridge_session::{ConnectionState, SessionConfig, SessionManager};
use serde_json::{json, Value};
use tokio::sync::mpsc;

async fn answer(peer: &mut MemoryPeer, result: Value) -> anyhow::Result<()> {
    let raw = peer
        .from_session
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("session went away"))?;
    let request: Value = serde_json::from_str(&raw)?;
    println!("peer <- {}", raw);
    peer.to_session
        .send(json!({ "id": request["id"], "result": result }).to_string())?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (transport, mut accept_rx) = MemoryTransport::new();
    let config = SessionConfig::new("demo", "127.0.0.1", 59650, "demo-token");
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();

    let manager = SessionManager::new(config, transport, notify_tx);
    let handle = manager.handle();
    tokio::spawn(manager.run());

    handle.start();

    // Play the server side: accept the dial and approve the auth call.
    let mut peer = accept_rx
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("no connection arrived"))?;
    answer(&mut peer, json!(true)).await?;

    let mut states = handle.state_watch();
    states.wait_for(|s| *s == ConnectionState::Ready).await?;
    println!("session ready");

    let (call_result, served) = tokio::join!(
        handle.call("ScenesService", "getScenes", vec![]),
        answer(&mut peer, json!(["sceneA", "sceneB"]))
    );
    served?;
    println!("getScenes -> {}", call_result?);

    let (token, negotiated) = tokio::join!(
        handle.subscribe(
            "ScenesService",
            "sceneSwitched",
            Arc::new(|data| println!("sceneSwitched event: {}", data)),
        ),
        answer(&mut peer, json!({ "resourceId": "sub-1" }))
    );
    negotiated?;
    println!("subscribed with token {}", token?);

    peer.to_session.send(
        json!({
            "id": null,
            "result": {
                "_type": "EVENT",
                "emitter": "STREAM",
                "resourceId": "sub-1",
                "data": { "name": "sceneB" }
            }
        })
        .to_string(),
    )?;

    // Give the event a moment to flow through before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop();
    while let Some(notification) = notify_rx.recv().await {
        println!("{}: {:?}", notification.session, notification.lifecycle);
        if notification.lifecycle == bridge_session::Lifecycle::Unload {
            break;
        }
    }
    Ok(())
}
