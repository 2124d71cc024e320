//! Internal decision vocabulary and plugin return values.

use milterflow_milter::Action;
use serde::{Deserialize, Serialize};

/// Decision taken by a content scanning plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// No final decision, keep going.
    #[default]
    Dunno,
    /// Accept the message, skip remaining plugins.
    Accept,
    /// Silently drop the message.
    Delete,
    /// Reject the message.
    Reject,
    /// Temporarily refuse the message.
    Defer,
}

impl Decision {
    /// Parses a decision name. `DISCARD` is accepted as an alias for `DELETE`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DUNNO" => Some(Self::Dunno),
            "ACCEPT" => Some(Self::Accept),
            "DELETE" | "DISCARD" => Some(Self::Delete),
            "REJECT" => Some(Self::Reject),
            "DEFER" => Some(Self::Defer),
            _ => None,
        }
    }

    /// Parses a decision name, logging and falling back to DUNNO.
    #[must_use]
    pub fn parse_or_dunno(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::error!(code = s, "Invalid action code, using DUNNO");
            Self::Dunno
        })
    }

    /// Upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dunno => "DUNNO",
            Self::Accept => "ACCEPT",
            Self::Delete => "DELETE",
            Self::Reject => "REJECT",
            Self::Defer => "DEFER",
        }
    }

    /// Wire action used when this decision is sent in an early phase.
    #[must_use]
    pub const fn to_action(self) -> Action {
        match self {
            Self::Dunno => Action::Continue,
            Self::Accept => Action::Accept,
            Self::Delete => Action::Discard,
            Self::Reject => Action::Reject,
            Self::Defer => Action::TempFail,
        }
    }

    /// Returns true if no further plugins run after this decision.
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Dunno)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply of a phase (milter) plugin: wire action plus optional SMTP text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReply {
    /// Wire action.
    pub action: Action,
    /// Reply text sent with `REJECT`/`TEMPFAIL`.
    pub message: Option<String>,
}

impl PhaseReply {
    /// Continue with the next plugin.
    #[must_use]
    pub const fn cont() -> Self {
        Self {
            action: Action::Continue,
            message: None,
        }
    }

    /// Action with a reply text.
    #[must_use]
    pub fn with_message(action: Action, message: impl Into<String>) -> Self {
        Self {
            action,
            message: Some(message.into()),
        }
    }
}

impl Default for PhaseReply {
    fn default() -> Self {
        Self::cont()
    }
}

impl From<Action> for PhaseReply {
    fn from(action: Action) -> Self {
        Self {
            action,
            message: None,
        }
    }
}

/// Reply of a content scanning plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanReply {
    /// Decision.
    pub decision: Decision,
    /// Reply text for `REJECT`/`DEFER`.
    pub message: Option<String>,
}

impl ScanReply {
    /// Decision with a reply text.
    #[must_use]
    pub fn with_message(decision: Decision, message: impl Into<String>) -> Self {
        Self {
            decision,
            message: Some(message.into()),
        }
    }
}

impl From<Decision> for ScanReply {
    fn from(decision: Decision) -> Self {
        Self {
            decision,
            message: None,
        }
    }
}
