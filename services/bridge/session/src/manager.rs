//! Reconnecting session manager for one control-API connection.
//!
//! A [`SessionManager`] owns one logical session: the transport
//! connection, the in-flight request table, and the event subscription
//! registry. All mutation is serialized on a single task driven by
//! [`SessionManager::run`]; callers interact through a cloneable
//! [`SessionHandle`] and observe lifecycle changes through
//! [`Notification`]s and a state watch channel.
//!
//! The session cycles `Disconnected -> Connecting -> Authenticating ->
//! Ready`. Losing the transport rejects every in-flight request with
//! `ConnectionLost`, clears the per-session subscription tokens, and
//! schedules a reconnect with linearly growing delay. Recorded
//! subscriptions are re-negotiated on every fresh session because the
//! server assigns new tokens each time.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use bridge_wire as wire;

use crate::error::RpcError;
use crate::pending::{Completion, PendingEntry, PendingTable};
use crate::subscription::{EventCallback, SubscriptionRegistry, SubscriptionSpec};
use crate::transport::{Connection, Endpoint, Transport, TransportError};

/// Default base unit for the linear reconnect delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Configuration for one managed session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Emitter name used in outward notifications
    pub name: String,
    /// Remote endpoint
    pub endpoint: Endpoint,
    /// Token sent in the reserved authentication call
    pub token: String,
    /// Base unit for the linear reconnect delay
    pub base_delay: Duration,
}

impl SessionConfig {
    /// Config with the default reconnect base delay
    pub fn new(name: &str, host: &str, port: u16, token: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: Endpoint {
                host: host.to_string(),
                port,
            },
            token: token.to_string(),
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport open
    Disconnected,
    /// Dialing the transport
    Connecting,
    /// Transport open, authentication call in flight
    Authenticating,
    /// Authenticated and serving calls
    Ready,
}

/// Lifecycle stages relayed to the hosting process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The session was asked to start
    Load,
    /// The session reached `Ready`
    Open,
    /// The transport closed or errored
    Close,
    /// The session was stopped explicitly
    Unload,
}

/// One outward notification, tagged with the emitter name
#[derive(Debug, Clone)]
pub struct Notification {
    /// Session (emitter) name from the config
    pub session: String,
    /// Lifecycle stage
    pub lifecycle: Lifecycle,
    /// Optional detail payload, close reasons and the like
    pub detail: Option<Value>,
}

enum Command {
    Start,
    Stop,
    Call {
        resource: String,
        method: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Value, RpcError>>,
    },
    Subscribe {
        spec: SubscriptionSpec,
        reply: oneshot::Sender<Result<String, RpcError>>,
    },
}

/// Cloneable handle issuing commands to the session task
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Ask the session to connect.
    ///
    /// Idempotent; a no-op unless the session is `Disconnected`.
    /// Returns immediately; completion is observed through state
    /// transitions, not a return value.
    pub fn start(&self) {
        let _ = self.cmd_tx.send(Command::Start);
    }

    /// Close the session without scheduling a reconnect
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    /// Invoke a remote method and await its correlated response.
    ///
    /// Fails fast with [`RpcError::NotConnected`] unless the session is
    /// `Ready`; requests are never queued across a reconnect because
    /// server-side resource references only live within one
    /// authenticated session. A response carrying an `error` payload
    /// rejects with [`RpcError::Remote`], passed verbatim.
    pub async fn call(
        &self,
        resource: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Call {
                resource: resource.to_string(),
                method: method.to_string(),
                args,
                reply,
            })
            .map_err(|_| RpcError::SessionClosed)?;
        rx.await.map_err(|_| RpcError::SessionClosed)?
    }

    /// Negotiate a server-push subscription and install `callback`
    /// under the returned token.
    ///
    /// The spec is recorded and re-negotiated automatically after every
    /// reconnect. On failure nothing is installed and the error is
    /// returned to the caller.
    pub async fn subscribe(
        &self,
        resource: &str,
        channel: &str,
        callback: EventCallback,
    ) -> Result<String, RpcError> {
        let (reply, rx) = oneshot::channel();
        let spec = SubscriptionSpec {
            resource: resource.to_string(),
            channel: channel.to_string(),
            callback,
        };
        self.cmd_tx
            .send(Command::Subscribe { spec, reply })
            .map_err(|_| RpcError::SessionClosed)?;
        rx.await.map_err(|_| RpcError::SessionClosed)?
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel following state transitions
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// Owns one session's lifecycle; consumed by [`SessionManager::run`]
pub struct SessionManager<T: Transport> {
    config: SessionConfig,
    transport: T,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

impl<T: Transport> SessionManager<T> {
    /// Create a manager delivering notifications to `notify_tx`
    pub fn new(config: SessionConfig, transport: T, notify_tx: mpsc::UnboundedSender<Notification>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            transport,
            cmd_tx,
            cmd_rx,
            state_tx,
            state_rx,
            notify_tx,
        }
    }

    /// Handle for issuing commands; clone freely
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cmd_tx: self.cmd_tx.clone(),
            state_rx: self.state_rx.clone(),
        }
    }

    /// Drive the session until every handle is dropped
    pub async fn run(self) {
        let SessionManager {
            config,
            transport,
            cmd_tx,
            mut cmd_rx,
            state_tx,
            state_rx,
            notify_tx,
        } = self;
        // Keeping our own sender would hold the command channel open
        // forever; the task must end once the last handle is gone.
        drop(cmd_tx);
        drop(state_rx);

        let mut task = SessionTask {
            config,
            transport,
            state: ConnectionState::Disconnected,
            state_tx,
            notify_tx,
            pending: PendingTable::new(),
            subs: SubscriptionRegistry::new(),
            attempts: 0,
            reconnect_at: None,
        };
        let mut conn: Option<T::Conn> = None;

        loop {
            tokio::select! {
                biased;

                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => task.handle_command(&mut conn, cmd).await,
                        None => {
                            debug!(session = %task.config.name, "all handles dropped; session task ending");
                            task.teardown(&mut conn).await;
                            break;
                        }
                    }
                }

                inbound = recv_next(&mut conn), if conn.is_some() => {
                    match inbound {
                        Some(Ok(frame)) => task.handle_frame(&mut conn, frame).await,
                        Some(Err(e)) => {
                            warn!(session = %task.config.name, "transport error: {}", e);
                            let detail = json!({ "reason": e.to_string() });
                            task.disconnect(&mut conn, Some(detail), true).await;
                        }
                        None => {
                            info!(session = %task.config.name, "transport closed by peer");
                            task.disconnect(&mut conn, None, true).await;
                        }
                    }
                }

                _ = sleep_until(task.reconnect_at.unwrap_or_else(Instant::now)), if task.reconnect_at.is_some() => {
                    task.reconnect_at = None;
                    task.connect(&mut conn).await;
                }
            }
        }
    }
}

/// Linear backoff: attempt `n` waits `n * base`.
///
/// Unbounded by design; the counter resets to zero once the session
/// reaches `Ready`.
pub fn reconnect_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}

async fn recv_next<C: Connection>(conn: &mut Option<C>) -> Option<Result<String, TransportError>> {
    match conn.as_mut() {
        Some(c) => c.recv().await,
        None => std::future::pending().await,
    }
}

struct SessionTask<T: Transport> {
    config: SessionConfig,
    transport: T,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    pending: PendingTable,
    subs: SubscriptionRegistry,
    attempts: u32,
    reconnect_at: Option<Instant>,
}

impl<T: Transport> SessionTask<T> {
    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(session = %self.config.name, "state {:?} -> {:?}", self.state, next);
            self.state = next;
            let _ = self.state_tx.send(next);
        }
    }

    fn notify(&self, lifecycle: Lifecycle, detail: Option<Value>) {
        let notification = Notification {
            session: self.config.name.clone(),
            lifecycle,
            detail,
        };
        if self.notify_tx.send(notification).is_err() {
            trace!(session = %self.config.name, "notification receiver gone");
        }
    }

    async fn handle_command(&mut self, conn: &mut Option<T::Conn>, cmd: Command) {
        match cmd {
            Command::Start => {
                if self.state != ConnectionState::Disconnected {
                    debug!(session = %self.config.name, "start ignored in state {:?}", self.state);
                    return;
                }
                self.notify(Lifecycle::Load, None);
                self.reconnect_at = None;
                self.connect(conn).await;
            }
            Command::Stop => {
                info!(session = %self.config.name, "session stopped");
                self.reconnect_at = None;
                self.attempts = 0;
                self.teardown(conn).await;
                self.notify(Lifecycle::Unload, None);
            }
            Command::Call {
                resource,
                method,
                args,
                reply,
            } => {
                if self.state != ConnectionState::Ready {
                    let _ = reply.send(Err(RpcError::NotConnected));
                    return;
                }
                self.send_request(conn, &resource, &method, args, Completion::Caller(reply))
                    .await;
            }
            Command::Subscribe { spec, reply } => {
                if self.state != ConnectionState::Ready {
                    let _ = reply.send(Err(RpcError::NotConnected));
                    return;
                }
                let resource = spec.resource.clone();
                let channel = spec.channel.clone();
                self.send_request(
                    conn,
                    &resource,
                    &channel,
                    Vec::new(),
                    Completion::Subscribe { spec, reply },
                )
                .await;
            }
        }
    }

    /// Register a pending entry and put the request on the wire.
    ///
    /// A send failure tears the session down; the fresh entry is then
    /// rejected along with every other in-flight request, so no future
    /// is ever silently dropped.
    async fn send_request(
        &mut self,
        conn: &mut Option<T::Conn>,
        resource: &str,
        method: &str,
        args: Vec<Value>,
        completion: Completion,
    ) {
        let id = self.pending.register(resource, method, completion);
        let frame = wire::Request::new(id, resource, method, args).encode();
        trace!(session = %self.config.name, "-> {} {}.{}", id, resource, method);

        let send_err = match conn.as_mut() {
            Some(c) => c.send(frame).await.err(),
            None => Some(TransportError::Send("no transport".to_string())),
        };
        if let Some(e) = send_err {
            warn!(session = %self.config.name, "send failed for request {}: {}", id, e);
            let detail = json!({ "reason": e.to_string() });
            self.disconnect(conn, Some(detail), true).await;
        }
    }

    async fn connect(&mut self, conn: &mut Option<T::Conn>) {
        self.set_state(ConnectionState::Connecting);
        info!(session = %self.config.name, "connecting to {}", self.config.endpoint.url());

        match self.transport.connect(&self.config.endpoint).await {
            Ok(c) => {
                *conn = Some(c);
                self.set_state(ConnectionState::Authenticating);
                let token = Value::String(self.config.token.clone());
                self.send_request(conn, wire::AUTH_RESOURCE, wire::AUTH_METHOD, vec![token], Completion::Auth)
                    .await;
            }
            Err(e) => {
                warn!(session = %self.config.name, "connect failed: {}", e);
                let detail = json!({ "reason": e.to_string() });
                self.disconnect(conn, Some(detail), true).await;
            }
        }
    }

    /// Tear down the current session without emitting a notification
    async fn teardown(&mut self, conn: &mut Option<T::Conn>) {
        if let Some(c) = conn.as_mut() {
            c.close().await;
        }
        *conn = None;
        let dropped = self.pending.len();
        self.pending.fail_all();
        self.subs.clear_active();
        if dropped > 0 {
            debug!(session = %self.config.name, "rejected {} in-flight requests", dropped);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Tear down, surface `Close`, and schedule the next attempt unless
    /// the teardown came from an explicit stop
    async fn disconnect(&mut self, conn: &mut Option<T::Conn>, detail: Option<Value>, reconnect: bool) {
        self.teardown(conn).await;
        self.notify(Lifecycle::Close, detail);
        if reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.attempts += 1;
        let delay = reconnect_delay(self.attempts, self.config.base_delay);
        info!(session = %self.config.name, "reconnect attempt {} in {:?}", self.attempts, delay);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn handle_frame(&mut self, conn: &mut Option<T::Conn>, raw: String) {
        let frame = match wire::decode_frame(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                // not necessarily ours; the channel may be multiplexed
                debug!(session = %self.config.name, "discarding malformed frame: {}", e);
                return;
            }
        };

        if let Some(id) = frame.id {
            if let Some(entry) = self.pending.complete(id) {
                self.complete_entry(conn, id, entry, frame.result, frame.error)
                    .await;
                return;
            }
        }

        if let Some(event) = frame.as_event() {
            match wire::token_key(&event.resource_id) {
                Some(token) => {
                    if !self.subs.dispatch(&token, event.data) {
                        debug!(session = %self.config.name, "event for unknown subscription token {}", token);
                    }
                }
                None => {
                    debug!(session = %self.config.name, "event envelope without a usable token");
                }
            }
            return;
        }

        trace!(session = %self.config.name, "discarding uncorrelated frame");
    }

    async fn complete_entry(
        &mut self,
        conn: &mut Option<T::Conn>,
        id: u64,
        entry: PendingEntry,
        result: Option<Value>,
        error: Option<Value>,
    ) {
        match entry.completion {
            Completion::Caller(reply) => {
                trace!(
                    session = %self.config.name,
                    "<- {} {}.{} after {:?}",
                    id,
                    entry.resource,
                    entry.method,
                    entry.created_at.elapsed()
                );
                let outcome = match error {
                    Some(payload) => Err(RpcError::Remote(payload)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = reply.send(outcome);
            }
            Completion::Auth => match error {
                Some(payload) => {
                    warn!(session = %self.config.name, "authentication failed: {}", payload);
                    self.disconnect(conn, Some(payload), true).await;
                }
                None => self.on_ready(conn).await,
            },
            Completion::Subscribe { spec, reply } => match error {
                Some(payload) => {
                    warn!(
                        session = %self.config.name,
                        "subscription {}.{} rejected: {}", spec.resource, spec.channel, payload
                    );
                    let _ = reply.send(Err(RpcError::Remote(payload)));
                }
                None => match result.as_ref().and_then(wire::subscription_token) {
                    Some(token) => {
                        debug!(
                            session = %self.config.name,
                            "subscribed {}.{} as {}", spec.resource, spec.channel, token
                        );
                        let resource = spec.resource.clone();
                        let channel = spec.channel.clone();
                        self.subs.record(spec);
                        self.subs.install(token.clone(), &resource, &channel);
                        let _ = reply.send(Ok(token));
                    }
                    None => {
                        warn!(
                            session = %self.config.name,
                            "subscription {}.{} returned no token", spec.resource, spec.channel
                        );
                        let _ = reply.send(Err(RpcError::Remote(result.unwrap_or(Value::Null))));
                    }
                },
            },
            Completion::Resubscribe { resource, channel } => match error {
                Some(payload) => {
                    warn!(
                        session = %self.config.name,
                        "re-subscribe {}.{} rejected: {}", resource, channel, payload
                    );
                }
                None => match result.as_ref().and_then(wire::subscription_token) {
                    Some(token) => {
                        debug!(
                            session = %self.config.name,
                            "re-subscribed {}.{} as {}", resource, channel, token
                        );
                        self.subs.install(token, &resource, &channel);
                    }
                    None => {
                        warn!(
                            session = %self.config.name,
                            "re-subscribe {}.{} returned no token", resource, channel
                        );
                    }
                },
            },
        }
    }

    async fn on_ready(&mut self, conn: &mut Option<T::Conn>) {
        info!(session = %self.config.name, "session ready");
        self.attempts = 0;
        self.set_state(ConnectionState::Ready);
        self.notify(Lifecycle::Open, None);
        self.resubscribe(conn).await;
    }

    /// Re-negotiate every recorded subscription on the fresh session.
    ///
    /// Tokens from the previous session are already gone; no event can
    /// be delivered until the new tokens are installed.
    async fn resubscribe(&mut self, conn: &mut Option<T::Conn>) {
        let specs: Vec<(String, String)> = self
            .subs
            .specs()
            .map(|s| (s.resource.clone(), s.channel.clone()))
            .collect();
        for (resource, channel) in specs {
            self.send_request(
                conn,
                &resource,
                &channel,
                Vec::new(),
                Completion::Resubscribe {
                    resource: resource.clone(),
                    channel: channel.clone(),
                },
            )
            .await;
            if self.state != ConnectionState::Ready {
                // a send failure tore the session down mid-loop
                break;
            }
        }
    }
}
