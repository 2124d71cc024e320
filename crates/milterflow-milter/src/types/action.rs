//! Milter wire actions.

use std::fmt;

/// Response action sent back to the MTA after a command.
///
/// `Deferred` is not a wire value: it marks that a reply was already
/// transmitted by hand (e.g. a custom `450`/`550` reply) and the protocol
/// layer must not send anything more for the current command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Continue processing the current message.
    Continue,
    /// Accept the message, skip all further callbacks.
    Accept,
    /// Reject the message or recipient.
    Reject,
    /// Temporary failure.
    TempFail,
    /// Accept but silently drop the message.
    Discard,
    /// A reply was already sent, send nothing.
    Deferred,
}

impl Action {
    /// Parses a lower-case action name (`continue`, `accept`, ...).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "accept" => Some(Self::Accept),
            "reject" => Some(Self::Reject),
            "tempfail" => Some(Self::TempFail),
            "discard" => Some(Self::Discard),
            _ => None,
        }
    }

    /// Returns the action name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::TempFail => "tempfail",
            Self::Discard => "discard",
            Self::Deferred => "deferred",
        }
    }

    /// Returns true if the protocol layer has to transmit this action.
    #[must_use]
    pub const fn needs_transmit(self) -> bool {
        !matches!(self, Self::Deferred)
    }

    /// Returns true for [`Action::Continue`].
    #[must_use]
    pub const fn is_continue(self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
