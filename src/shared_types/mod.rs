pub mod session_id;
pub mod session_stage;

pub use session_id::SessionId;
pub use session_stage::SessionStage;
