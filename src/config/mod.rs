pub mod cli;
pub mod config;
pub mod settings;
pub mod types;

pub use config::Config;
pub use settings::{
    BackendSettings, GatewaySettings, LoopbackSettings, ServerSettings, SessionSettings,
    SettingsError,
};
pub use types::LogLevel;
