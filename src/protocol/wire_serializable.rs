use std::error::Error as StdError;

/// A message that travels as exactly one text frame.
pub trait WireSerializable: Sized {
    type Error: StdError + Send + Sync + 'static;

    /// Serialize the message into the frame body.
    fn to_frame(&self) -> Result<String, Self::Error>;

    /// Deserialize and validate a frame body.
    fn from_frame(frame: &str) -> Result<Self, Self::Error>;
}
