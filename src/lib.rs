pub mod backend;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod net;
pub mod protocol;
pub mod shared_types;
pub mod timing;

pub use config::Config;
pub use errors::{ErrorResponse, GatewayError};
pub use gateway::{Gateway, Session, SessionRegistry};
