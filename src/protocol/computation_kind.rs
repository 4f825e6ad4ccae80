use std::{fmt, str::FromStr};

use super::error::DecodeError;

// -----------------------------------------------------------------------------
// ----- ComputationKind -------------------------------------------------------

/// Which backend operation a data frame asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationKind {
    /// Round-trip the payload through the backend context.
    Echo,

    /// Run the model on the payload and return bounding boxes.
    Bbox,
}

impl ComputationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComputationKind::Echo => "echo",
            ComputationKind::Bbox => "bbox",
        }
    }
}

impl FromStr for ComputationKind {
    type Err = DecodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "echo" => Ok(ComputationKind::Echo),
            "bbox" => Ok(ComputationKind::Bbox),
            other => Err(DecodeError::UnknownMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for ComputationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
