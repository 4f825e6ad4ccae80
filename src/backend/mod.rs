//! Everything the gateway knows about the compute service: the four-call
//! client interface, the per-call deadline, and the per-session context.

pub mod client;
pub mod context;
pub mod deadline;
pub mod loopback;

pub use client::{BackendClient, BackendError, BackendOperation, BackendReply};
pub use context::BackendContext;
pub use deadline::DeadlineClient;
pub use loopback::{LoopbackBackend, LoopbackStats};
