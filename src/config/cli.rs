use clap::Parser;
use parking_lot::RwLock;
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub listen_addr: SocketAddr,
    pub settings_file_location: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let cfg = Self::from_args();
            cfg.validate();
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| panic!("Invalid CLI/ENV: {e}"));
        Self::from_parsed(args)
    }

    fn from_parsed(args: Args) -> Self {
        Self {
            listen_addr: SocketAddr::from((args.host, args.port)),
            settings_file_location: args.config_file,
            log_level: args.log_level,
        }
    }

    fn validate(&self) {
        if let Some(path) = &self.settings_file_location {
            must_exist_file(path, "--config / modelgate.toml");
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "modelgate", version, about = "WebSocket gateway to a model server")]
struct Args {
    // IPv4 or IPv6 literal (e.g., 0.0.0.0, 127.0.0.1, ::, ::1). Required via CLI or ENV.
    #[arg(long = "host", short = 'H', env = "MODELGATE_HOST")]
    host: IpAddr,

    // Required via CLI or ENV.
    #[arg(long = "port", short = 'p', env = "MODELGATE_PORT")]
    port: u16,

    // Not required via CLI or ENV (defaults to info).
    #[arg(long = "log", default_value = "info")]
    log_level: LogLevel,

    // Optional; built-in defaults apply when absent. Must exist when given.
    #[arg(long = "config", env = "MODELGATE_CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("config not initialized; call config::init().await first")
        .clone()
}

fn must_exist_file(path: &Path, hint: &str) {
    let md = fs::metadata(path).unwrap_or_else(|_| {
        panic!("required file missing: {} (from {hint})", path.display());
    });

    if !md.is_file() {
        panic!("path is not a file: {} (from {hint})", path.display());
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_level() {
        let args = Args::try_parse_from([
            "modelgate", "--host", "127.0.0.1", "--port", "8080", "--log", "debug",
        ])
        .unwrap();
        let cfg = CliConfig::from_parsed(args);

        assert_eq!(cfg.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert!(cfg.settings_file_location.is_none());
    }

    #[test]
    fn ipv6_listen_address() {
        let args = Args::try_parse_from(["modelgate", "-H", "::1", "-p", "9000"]).unwrap();
        let cfg = CliConfig::from_parsed(args);

        assert!(cfg.listen_addr.is_ipv6());
        assert_eq!(cfg.log_level, LogLevel::Info);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
