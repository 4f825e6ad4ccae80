use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::timeout,
};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use tracing::debug;

use crate::errors::{ErrorResponse, GatewayError};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Upper bound on one outgoing frame or close handshake. A peer that stops
/// reading must not pin its session.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- ClientConnection ------------------------------------------------------

/// A ready-to-use, message-framed duplex channel to one client.
///
/// `recv_frame` must be cancel-safe: the session loop races it against its
/// control channel.
#[async_trait]
pub trait ClientConnection: Send + 'static {
    /// Next text frame, or `Ok(None)` once the peer has closed.
    async fn recv_frame(&mut self) -> Result<Option<String>, GatewayError>;

    async fn send_frame(&mut self, frame: String) -> Result<(), GatewayError>;

    /// Close the channel, optionally telling the client why. Best effort.
    async fn close(&mut self, reason: Option<ErrorResponse>);

    /// Human readable peer label for logs.
    fn peer(&self) -> &str;
}

pub type BoxedConnection = Box<dyn ClientConnection>;

// -----------------------------------------------------------------------------
// ----- WsConnection ----------------------------------------------------------

/// [`ClientConnection`] over an upgraded WebSocket.
pub struct WsConnection<S> {
    stream: WebSocketStream<S>,
    peer: String,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<S> ClientConnection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv_frame(&mut self) -> Result<Option<String>, GatewayError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            match message? {
                Message::Text(text) => return Ok(Some(text.as_str().to_string())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => return Err(crate::protocol::DecodeError::NotText.into()),
                },
                Message::Close(_) => return Ok(None),

                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), GatewayError> {
        timeout(WRITE_TIMEOUT, self.stream.send(Message::text(frame)))
            .await
            .map_err(|_| GatewayError::SendTimeout(WRITE_TIMEOUT))??;
        Ok(())
    }

    async fn close(&mut self, reason: Option<ErrorResponse>) {
        let frame = reason.map(|r| r.to_close_frame());
        match timeout(WRITE_TIMEOUT, self.stream.close(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("close for {} failed: {e}", self.peer),
            Err(_) => debug!("close for {} timed out; dropping the socket", self.peer),
        }
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// A server-side connection whose peer never reads anything.
    async fn stalled_peer() -> (WsConnection<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (server, client) = tokio::io::duplex(64);
        let stream = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (WsConnection::new(stream, "stalled"), client)
    }

    #[tokio::test(start_paused = true)]
    async fn send_to_a_stalled_peer_times_out() {
        let (mut conn, _client) = stalled_peer().await;

        let err = conn.send_frame("x".repeat(64 * 1024)).await.unwrap_err();
        assert!(matches!(err, GatewayError::SendTimeout(after) if after == WRITE_TIMEOUT));
        assert!(err.is_disconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn close_to_a_stalled_peer_returns() {
        let (mut conn, _client) = stalled_peer().await;
        let _ = conn.send_frame("x".repeat(64 * 1024)).await;

        let started = tokio::time::Instant::now();
        conn.close(Some(ErrorResponse::going_away("bye"))).await;
        assert!(started.elapsed() <= WRITE_TIMEOUT);
    }
}
