//! Decoded commands received from the MTA.

use bytes::Bytes;

use crate::types::Macros;

/// Address family of the connecting SMTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// IPv4 (`'4'`)
    Inet4,
    /// IPv6 (`'6'`)
    Inet6,
    /// Unix socket (`'L'`)
    Unix,
    /// Unknown (`'U'`)
    Unknown,
}

impl Family {
    /// Parses the protocol family byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        match b {
            b'4' => Self::Inet4,
            b'6' => Self::Inet6,
            b'L' => Self::Unix,
            _ => Self::Unknown,
        }
    }

    /// Returns true for IPv4 and IPv6.
    #[must_use]
    pub const fn is_inet(self) -> bool {
        matches!(self, Self::Inet4 | Self::Inet6)
    }
}

/// One decoded milter command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `SMFIC_CONNECT`
    Connect {
        /// Client hostname as resolved by the MTA, `[ip]` if unresolved
        hostname: String,
        /// Address family
        family: Family,
        /// Client address
        addr: String,
        /// Client port
        port: u16,
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_HELO`
    Helo {
        /// HELO/EHLO argument
        name: String,
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_MAIL`
    MailFrom {
        /// Raw sender argument, may carry `<>` and NUL-separated parameters
        sender: String,
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_RCPT`
    Rcpt {
        /// Raw recipient argument
        recipient: String,
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_DATA`
    Data {
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_HEADER`
    Header {
        /// Header name
        name: String,
        /// Header value
        value: String,
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_EOH`
    EndOfHeaders {
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_BODY`
    Body {
        /// Body chunk
        chunk: Bytes,
    },
    /// `SMFIC_BODYEOB`
    EndOfBody {
        /// Macros sent for this stage
        macros: Macros,
    },
    /// `SMFIC_ABORT`
    Abort,
    /// `SMFIC_QUIT`
    Quit,
}

impl Event {
    /// Returns true if the MTA waits for a response to this command.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        !matches!(self, Self::Body { .. } | Self::Abort | Self::Quit)
    }

    /// Phase name used in logs and timings.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Helo { .. } => "helo",
            Self::MailFrom { .. } => "mailfrom",
            Self::Rcpt { .. } => "rcpt",
            Self::Data { .. } => "data",
            Self::Header { .. } => "header",
            Self::EndOfHeaders { .. } => "eoh",
            Self::Body { .. } => "body",
            Self::EndOfBody { .. } => "eob",
            Self::Abort => "abort",
            Self::Quit => "quit",
        }
    }
}
