use std::fmt;

use serde::Serialize;

/// Capture session lifecycle.
///
/// State transitions:
/// ```text
/// uninitialized → configured ⇄ recording
///                      ↑           ↓
///                      └─ stopping ┘
///
/// any state ── teardown ──→ uninitialized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Configured,
    Recording,
    Stopping,
}

impl SessionState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// Whether the config may be replaced in this state.
    pub fn accepts_config(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Configured)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_states_accept_config() {
        assert!(SessionState::Uninitialized.accepts_config());
        assert!(SessionState::Configured.accepts_config());
        assert!(!SessionState::Recording.accepts_config());
        assert!(!SessionState::Stopping.accepts_config());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Recording).unwrap();
        assert_eq!(json, "\"recording\"");
    }
}
