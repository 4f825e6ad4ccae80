/// Lifecycle of one logical client session.
///
/// Stages only move forward. A session that reached `Closed` is never reused;
/// a later registration with the same id creates a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    /// First contact: waiting for backend Register and the registry insert.
    Registering,

    /// Receive, dispatch, reply.
    Active,

    /// Backend context is being released.
    Terminating,

    /// Connection released and registry entry gone.
    Closed,
}

impl SessionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStage::Registering => "registering",
            SessionStage::Active => "active",
            SessionStage::Terminating => "terminating",
            SessionStage::Closed => "closed",
        }
    }

    pub fn is_closed(self) -> bool {
        self == SessionStage::Closed
    }
}
