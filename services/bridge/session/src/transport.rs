//! Duplex frame transports for the control-API session.
//!
//! A transport delivers one complete text frame per `recv()` call;
//! framing and reassembly happen below this interface. Two bindings are
//! provided: a WebSocket client for the real control API and an
//! in-process channel pair used by the test suite and by embedders that
//! already own a message pipe.

use async_trait::async_trait;
use thiserror::Error;

/// Remote endpoint for an outbound connection
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
}

impl Endpoint {
    /// WebSocket URL of the control API
    pub fn url(&self) -> String {
        format!("ws://{}:{}/api", self.host, self.port)
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Dialing the endpoint failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed
    #[error("send failed: {0}")]
    Send(String),

    /// Reading the next frame failed
    #[error("receive failed: {0}")]
    Recv(String),
}

/// Dialer producing one duplex connection at a time
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection type produced by this transport
    type Conn: Connection;

    /// Open a connection to the endpoint
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Conn, TransportError>;
}

/// One live duplex connection carrying complete text frames
#[async_trait]
pub trait Connection: Send + 'static {
    /// Send one complete frame
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Receive the next complete frame; `None` once the peer closed
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection
    async fn close(&mut self);
}

/// WebSocket client transport
pub mod ws {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tracing::{debug, trace};

    /// Dialer for the control API's WebSocket endpoint
    #[derive(Debug, Clone, Copy, Default)]
    pub struct WsTransport;

    /// Live WebSocket connection
    pub struct WsConnection {
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    #[async_trait]
    impl Transport for WsTransport {
        type Conn = WsConnection;

        async fn connect(&self, endpoint: &Endpoint) -> Result<WsConnection, TransportError> {
            let url = endpoint.url();
            let (stream, response) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            debug!("websocket open to {} (status {})", url, response.status());
            Ok(WsConnection { stream })
        }
    }

    #[async_trait]
    impl Connection for WsConnection {
        async fn send(&mut self, frame: String) -> Result<(), TransportError> {
            self.stream
                .send(Message::text(frame))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                    Ok(Message::Close(_)) => return None,
                    // control frames and binary noise are not ours
                    Ok(other) => trace!("skipping non-text message: {:?}", other),
                    Err(e) => return Some(Err(TransportError::Recv(e.to_string()))),
                }
            }
        }

        async fn close(&mut self) {
            let _ = self.stream.close(None).await;
        }
    }
}

/// In-process transport backed by channel pairs
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// Far side of an accepted in-process connection.
    ///
    /// Whoever holds the acceptor plays the server: frames the session
    /// sends arrive on `from_session`, frames pushed into `to_session`
    /// are delivered to the session. Dropping the peer closes the
    /// connection from the session's point of view.
    pub struct MemoryPeer {
        /// Frames sent by the session
        pub from_session: mpsc::UnboundedReceiver<String>,
        /// Frames delivered to the session
        pub to_session: mpsc::UnboundedSender<String>,
    }

    /// Dialer whose connections terminate in-process
    #[derive(Debug, Clone)]
    pub struct MemoryTransport {
        accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    }

    /// Live in-process connection
    pub struct MemoryConnection {
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl MemoryTransport {
        /// Create a dialer and the acceptor handing out peers.
        ///
        /// Dropping the acceptor makes every subsequent `connect` fail,
        /// which is how tests simulate an unreachable endpoint.
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
            let (accept_tx, accept_rx) = mpsc::unbounded_channel();
            (Self { accept_tx }, accept_rx)
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        type Conn = MemoryConnection;

        async fn connect(&self, _endpoint: &Endpoint) -> Result<MemoryConnection, TransportError> {
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.accept_tx
                .send(MemoryPeer {
                    from_session: out_rx,
                    to_session: in_tx,
                })
                .map_err(|_| TransportError::Connect("connection refused".to_string()))?;
            Ok(MemoryConnection {
                tx: out_tx,
                rx: in_rx,
            })
        }
    }

    #[async_trait]
    impl Connection for MemoryConnection {
        async fn send(&mut self, frame: String) -> Result<(), TransportError> {
            self.tx
                .send(frame)
                .map_err(|_| TransportError::Send("peer gone".to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: 59650,
        }
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint().url(), "ws://127.0.0.1:59650/api");
    }

    #[tokio::test]
    async fn test_memory_connect_and_exchange() {
        let (transport, mut accept_rx) = MemoryTransport::new();

        let mut conn = transport.connect(&endpoint()).await.unwrap();
        let mut peer = accept_rx.recv().await.unwrap();

        conn.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.from_session.recv().await.unwrap(), "hello");

        peer.to_session.send("world".to_string()).unwrap();
        assert_eq!(conn.recv().await.unwrap().unwrap(), "world");

        drop(peer);
        assert!(conn.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_connect_refused_without_acceptor() {
        let (transport, accept_rx) = MemoryTransport::new();
        drop(accept_rx);

        let result = transport.connect(&endpoint()).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
