use async_trait::async_trait;
use tokio::sync::mpsc;

use super::ClientConnection;
use crate::errors::{ErrorResponse, GatewayError};

// -----------------------------------------------------------------------------
// ----- memory_pair -----------------------------------------------------------

/// A connected in-process channel: the gateway side and the client side.
pub fn memory_pair(peer: impl Into<String>) -> (MemoryConnection, MemoryClient) {
    let (to_gateway, from_client) = mpsc::unbounded_channel();
    let (to_client, from_gateway) = mpsc::unbounded_channel();

    let conn = MemoryConnection {
        inbound: from_client,
        outbound: to_client,
        closed: false,
        peer: peer.into(),
    };
    let client = MemoryClient {
        outbound: Some(to_gateway),
        inbound: from_gateway,
    };

    (conn, client)
}

// -----------------------------------------------------------------------------
// ----- ClientEvent -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Frame(String),
    Closed(Option<ErrorResponse>),
}

// -----------------------------------------------------------------------------
// ----- MemoryConnection ------------------------------------------------------

#[derive(Debug)]
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    closed: bool,
    peer: String,
}

#[async_trait]
impl ClientConnection for MemoryConnection {
    async fn recv_frame(&mut self) -> Result<Option<String>, GatewayError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::ConnectionClosed);
        }
        self.outbound
            .send(ClientEvent::Frame(frame))
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    async fn close(&mut self, reason: Option<ErrorResponse>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbound.close();
        let _ = self.outbound.send(ClientEvent::Closed(reason));
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

// -----------------------------------------------------------------------------
// ----- MemoryClient ----------------------------------------------------------

#[derive(Debug)]
pub struct MemoryClient {
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<ClientEvent>,
}

impl MemoryClient {
    /// Queue a frame for the gateway. Returns false once the gateway side is
    /// gone or [`MemoryClient::disconnect`] was called.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(frame.into()).is_ok(),
            None => false,
        }
    }

    /// Drop the client's half without a close handshake.
    pub fn disconnect(&mut self) {
        self.outbound = None;
    }

    /// Next event from the gateway; `None` once the gateway side is dropped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.inbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.inbound.try_recv().ok()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
