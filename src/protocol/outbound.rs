use serde::{Deserialize, Serialize};

use super::WireSerializable;
use crate::timing::TimingRecord;

// -----------------------------------------------------------------------------
// ----- BoundingBox -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

// -----------------------------------------------------------------------------
// ----- Outbound messages -----------------------------------------------------

/// `{sessionId, echoedMessage, timingData}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistrationAck {
    pub session_id: String,
    pub echoed_message: String,
    pub timing_data: TimingRecord,
}

/// `{echoedMessage, timingData}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EchoResult {
    pub echoed_message: String,
    pub timing_data: TimingRecord,
}

/// `{bboxData: [{x, y, w, h}, ...], timingData}`; box order is the backend's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BboxResult {
    pub bbox_data: Vec<BoundingBox>,
    pub timing_data: TimingRecord,
}

// -----------------------------------------------------------------------------
// ----- OutboundFrame ---------------------------------------------------------

/// Anything the gateway sends to a client. The variants carry no tag on the
/// wire; their field sets are disjoint enough to tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    RegistrationAck(RegistrationAck),
    Echo(EchoResult),
    Bbox(BboxResult),
}

impl OutboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::RegistrationAck(_) => "registration-ack",
            OutboundFrame::Echo(_) => "echo-result",
            OutboundFrame::Bbox(_) => "compute-result",
        }
    }
}

impl From<RegistrationAck> for OutboundFrame {
    fn from(value: RegistrationAck) -> Self {
        OutboundFrame::RegistrationAck(value)
    }
}

impl From<EchoResult> for OutboundFrame {
    fn from(value: EchoResult) -> Self {
        OutboundFrame::Echo(value)
    }
}

impl From<BboxResult> for OutboundFrame {
    fn from(value: BboxResult) -> Self {
        OutboundFrame::Bbox(value)
    }
}

impl WireSerializable for OutboundFrame {
    type Error = serde_json::Error;

    fn to_frame(&self) -> Result<String, Self::Error> {
        serde_json::to_string(self)
    }

    fn from_frame(frame: &str) -> Result<Self, Self::Error> {
        serde_json::from_str(frame)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::TimingRecorder;
    use serde_json::json;

    fn timing() -> TimingRecord {
        TimingRecorder::start().finish("ts", "1.000", "t0")
    }

    #[test]
    fn ack_uses_wire_field_names() {
        let frame = OutboundFrame::from(RegistrationAck {
            session_id: "abc".into(),
            echoed_message: "register".into(),
            timing_data: timing(),
        });

        let value: serde_json::Value = serde_json::from_str(&frame.to_frame().unwrap()).unwrap();
        assert_eq!(value["sessionId"], "abc");
        assert_eq!(value["echoedMessage"], "register");
        assert_eq!(value["timingData"]["startTime"], "t0");
    }

    #[test]
    fn bbox_result_keeps_box_order() {
        let frame = OutboundFrame::from(BboxResult {
            bbox_data: vec![BoundingBox::new(600, 100, 100, 100), BoundingBox::new(1, 2, 3, 4)],
            timing_data: timing(),
        });

        let value: serde_json::Value = serde_json::from_str(&frame.to_frame().unwrap()).unwrap();
        assert_eq!(
            value["bboxData"],
            json!([{"x":600,"y":100,"w":100,"h":100},{"x":1,"y":2,"w":3,"h":4}])
        );
    }

    #[test]
    fn untagged_frames_decode_to_the_right_variant() {
        let echo = OutboundFrame::from(EchoResult {
            echoed_message: "hi".into(),
            timing_data: timing(),
        });
        let decoded = OutboundFrame::from_frame(&echo.to_frame().unwrap()).unwrap();
        assert_eq!(decoded.kind(), "echo-result");
        assert_eq!(decoded, echo);

        let ack = OutboundFrame::from(RegistrationAck {
            session_id: "s".into(),
            echoed_message: "register".into(),
            timing_data: timing(),
        });
        let decoded = OutboundFrame::from_frame(&ack.to_frame().unwrap()).unwrap();
        assert_eq!(decoded.kind(), "registration-ack");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
