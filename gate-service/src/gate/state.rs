use serde::Serialize;
use std::fmt;

/// Outward state of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    #[serde(rename = "checking")]
    Checking,
    #[serde(rename = "verified")]
    Verified,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "locked")]
    Locked,
    #[serde(rename = "2fa_required")]
    TwoFactorRequired,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Checking => "checking",
            GateState::Verified => "verified",
            GateState::Failed => "failed",
            GateState::Locked => "locked",
            GateState::TwoFactorRequired => "2fa_required",
        }
    }

    pub fn is_terminal_denial(&self) -> bool {
        matches!(self, GateState::Failed | GateState::Locked)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run guard for one gate instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Settled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_factor_state_serializes_with_short_name() {
        assert_eq!(
            serde_json::to_string(&GateState::TwoFactorRequired).unwrap(),
            "\"2fa_required\""
        );
        assert_eq!(GateState::TwoFactorRequired.to_string(), "2fa_required");
    }
}
