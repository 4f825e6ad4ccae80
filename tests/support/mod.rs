use std::{io::Write, net::TcpListener, process::Command, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tokio::{net::TcpStream, time::sleep};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::frame::coding::CloseCode},
};

pub const HOST: &str = "127.0.0.1";

// -----------------------------------------------------------------------------
// ----- Server process --------------------------------------------------------

/// A running modelgate binary; killed on drop.
pub struct Server {
    pub port: u16,
    child: std::process::Child,
    _settings: NamedTempFile,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[allow(dead_code)]
pub fn reserve_port(host: &str) -> u16 {
    let addr = format!("{host}:0");
    let listener = TcpListener::bind(&addr).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

/// Start the binary with `settings` written to a temporary modelgate.toml.
#[allow(dead_code)]
pub async fn spawn_modelgate(settings: &str) -> Server {
    let mut file = NamedTempFile::new().expect("create settings file");
    file.write_all(settings.as_bytes()).expect("write settings file");

    let port = reserve_port(HOST);
    let exe = env!("CARGO_BIN_EXE_modelgate");

    let child = Command::new(exe)
        .env("MODELGATE_HOST", HOST)
        .env("MODELGATE_PORT", port.to_string())
        .env("MODELGATE_CONFIG_FILE", file.path())
        .spawn()
        .expect("spawn modelgate");

    wait_for_listen(HOST, port).await;

    Server {
        port,
        child,
        _settings: file,
    }
}

/// Poll with real WebSocket upgrades until the server answers one.
#[allow(dead_code)]
pub async fn wait_for_listen(host: &str, port: u16) {
    let url = format!("ws://{host}:{port}");
    for _ in 0..50 {
        if let Ok((mut ws, _)) = connect_async(url.as_str()).await {
            let _ = ws.close(None).await;
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("modelgate did not start listening on {url}");
}

// -----------------------------------------------------------------------------
// ----- Client ----------------------------------------------------------------

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[allow(dead_code)]
impl Client {
    pub async fn connect(server: &Server) -> Client {
        let url = format!("ws://{HOST}:{}", server.port);
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        Client { ws }
    }

    /// Connect and send the registration frame for `session_id`.
    pub async fn register(server: &Server, session_id: &str, start_time: &str) -> Client {
        let mut client = Client::connect(server).await;
        client
            .send_json(json!({ "sessionId": session_id, "startTime": start_time }))
            .await;
        client
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: String) {
        self.ws.send(Message::text(text)).await.expect("send frame");
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.ws.send(Message::binary(bytes)).await.expect("send frame");
    }

    pub async fn compute(&mut self, kind: &str, message: &str, start_time: &str) {
        self.send_json(json!({
            "message": message,
            "startTime": start_time,
            "terminateSession": "false",
            "messageType": kind,
        }))
        .await;
    }

    pub async fn terminate(&mut self, start_time: &str) {
        self.send_json(json!({
            "message": "",
            "startTime": start_time,
            "terminateSession": "true",
            "messageType": "echo",
        }))
        .await;
    }

    /// Next JSON frame from the gateway.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");

            match message {
                Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json frame"),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Wait for the gateway to close the connection and return its close code.
    pub async fn recv_close(&mut self) -> Option<CloseCode> {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for close");

            match next {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("expected close, got {other:?}"),
                Some(Err(_)) | None => return None,
            }
        }
    }
}
