use serde::{Deserialize, Serialize};

/// Identity of one logical conversation, embedded verbatim in the
/// initialization frame sent right after every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub runner_type: String,
    /// IANA time zone id, e.g. `"Europe/London"`.
    pub time_zone: String,
}

impl SessionDescriptor {
    pub fn new(
        session_id: impl Into<String>,
        runner_type: impl Into<String>,
        time_zone: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            runner_type: runner_type.into(),
            time_zone: time_zone.into(),
        }
    }

    /// `"{time_zone},{runner_type},{session_id}"`, no escaping.
    pub fn init_frame(&self) -> String {
        format!("{},{},{}", self.time_zone, self.runner_type, self.session_id)
    }

    /// Same runner and zone, different session id.
    pub fn with_session_id(&self, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..self.clone()
        }
    }
}
