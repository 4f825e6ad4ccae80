use std::{future::Future, io, time::Duration};

use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::tungstenite::{self, error::ProtocolError};
use tracing::{debug, error, info, warn};

use super::WsConnection;
use crate::gateway::Gateway;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Upper bound on the WebSocket upgrade of a freshly accepted socket.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- serve -----------------------------------------------------------------

/// Accept WebSocket clients on `listener` and hand each one to `gateway`
/// until `shutdown` resolves. On the way out, live sessions get `grace` to
/// terminate their backend contexts.
pub async fn serve<F>(
    listener: TcpListener,
    gateway: Gateway,
    shutdown: F,
    grace: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested; closing {} sessions", gateway.registry().len().await);
                break;
            }

            accept_res = listener.accept() => {
                let (stream, peer) = match accept_res {
                    Ok(v) => v,
                    Err(e) => { error!("accept error: {e}"); continue; }
                };

                let _ = stream.set_nodelay(true);
                let gateway = gateway.clone();

                tokio::spawn(async move {
                    let ws = match timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream)).await {
                        Ok(Ok(ws)) => ws,
                        Ok(Err(e)) if is_early_disconnect(&e) => {
                            debug!("client {peer} left before the handshake: {e}");
                            return;
                        }
                        Ok(Err(e)) => { warn!("client {peer} handshake failed: {e}"); return; }
                        Err(_) => { warn!("client {peer} handshake timed out"); return; }
                    };
                    debug!("client {peer} upgraded");

                    let conn = WsConnection::new(ws, peer.to_string());
                    if let Err(e) = gateway.accept(Box::new(conn)).await {
                        error!("client {peer} error: {e}");
                    }
                });
            }
        }
    }

    gateway.shutdown(grace).await;
    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// The peer hung up before sending a full upgrade request, as port probes and
/// load balancer health checks do.
fn is_early_disconnect(error: &tungstenite::Error) -> bool {
    match error {
        tungstenite::Error::Protocol(ProtocolError::HandshakeIncomplete)
        | tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
        ),
        _ => false,
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
