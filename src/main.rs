use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use modelgate::{
    Config, Gateway,
    backend::{BackendClient, DeadlineClient, LoopbackBackend},
    net,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🦀 modelgate";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::io::Result<()> {
    setup().await;
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> std::io::Result<()> {
    let config = Config::snapshot();
    let settings = config.settings;

    let socket = if config.listen_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    socket.bind(config.listen_addr)?;

    let listener: TcpListener = socket.listen(1024)?;

    let backend: Arc<dyn BackendClient> = Arc::new(DeadlineClient::new(
        LoopbackBackend::new(settings.loopback),
        settings.backend.call_timeout,
    ));
    let gateway = Gateway::new(backend, settings.session);

    info!("{} listening on {}", APP_NAME, config.listen_addr);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        info!("{} shutting down", APP_NAME);
    };

    net::serve(listener, gateway, shutdown, settings.server.shutdown_grace).await
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
