//! Lifecycle phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle point a stage is bound to.
///
/// `OnRequest` stages run before the route handler; `OnBeforeResponse`
/// stages run after it, just before the response is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Pre-handler.
    OnRequest,
    /// Post-handler, pre-send.
    OnBeforeResponse,
}

impl Phase {
    /// Returns the phase name used in logs and metric labels.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OnRequest => "on_request",
            Self::OnBeforeResponse => "on_before_response",
        }
    }

    /// Returns both phases in execution order.
    #[must_use]
    pub const fn all() -> [Phase; 2] {
        [Self::OnRequest, Self::OnBeforeResponse]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::OnRequest < Phase::OnBeforeResponse);
        assert_eq!(Phase::all(), [Phase::OnRequest, Phase::OnBeforeResponse]);
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&Phase::OnBeforeResponse).unwrap();
        assert_eq!(json, "\"on_before_response\"");
        assert_eq!(Phase::OnRequest.to_string(), "on_request");
    }
}
