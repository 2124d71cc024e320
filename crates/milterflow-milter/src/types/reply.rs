//! Custom SMTP replies sent through the milter.

use std::fmt;

/// Custom SMTP reply (`SMFIR_REPLYCODE`) handed to the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 550).
    pub code: ReplyCode,
    /// Enhanced status code (e.g., `5.7.1`), empty if none.
    pub xcode: String,
    /// Reply text.
    pub message: String,
}

impl Reply {
    /// Creates a new reply without touching the enhanced code.
    #[must_use]
    pub fn new(code: ReplyCode, xcode: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            xcode: xcode.into(),
            message: message.into(),
        }
    }

    /// Builds a reply, filling in a default enhanced status code.
    ///
    /// An explicit `xcode` is used verbatim. Otherwise 5xx codes get
    /// `5.7.1` and 4xx codes get `4.7.1`. If the message already starts
    /// with the class of that default (`5.` / `4.`), its first token is
    /// taken as the enhanced code instead so it is not sent twice.
    #[must_use]
    pub fn format(code: ReplyCode, xcode: &str, message: &str) -> Self {
        if !xcode.is_empty() {
            return Self::new(code, xcode, message);
        }

        let Some(default) = code.default_enhanced() else {
            return Self::new(code, "", message);
        };

        if !message.starts_with(&default[..2]) {
            return Self::new(code, default, message);
        }

        match message.split_once(' ') {
            Some((actual, rest)) => Self::new(code, actual, rest),
            None => Self::new(code, "", message),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.xcode.is_empty() {
            write!(f, "{} {}", self.code, self.message)
        } else {
            write!(f, "{} {} {}", self.code, self.xcode, self.message)
        }
    }
}

/// Shortcut for [`Reply::format`].
#[must_use]
pub fn format_reply(code: u16, xcode: &str, message: &str) -> Reply {
    Reply::format(ReplyCode::new(code), xcode, message)
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Default enhanced status code for this reply class.
    #[must_use]
    pub const fn default_enhanced(self) -> Option<&'static str> {
        match self.0 / 100 {
            5 => Some("5.7.1"),
            4 => Some("4.7.1"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Codes the filter emits
impl ReplyCode {
    /// 450 Mailbox unavailable, used for deferrals
    pub const TEMPFAIL: Self = Self(450);
    /// 550 Mailbox unavailable, used for rejects
    pub const REJECT: Self = Self(550);
}
