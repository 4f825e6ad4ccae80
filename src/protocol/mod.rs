//! Client-facing message schema: one JSON object per text frame.
//!
//! Decoding is strict. Missing fields, unknown fields and out-of-range tags
//! are rejected at this boundary instead of being zero-filled.

pub mod computation_kind;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod wire_serializable;

pub use computation_kind::ComputationKind;
pub use error::DecodeError;
pub use inbound::{DataFrame, RegistrationFrame};
pub use outbound::{BboxResult, BoundingBox, EchoResult, OutboundFrame, RegistrationAck};
pub use wire_serializable::WireSerializable;
