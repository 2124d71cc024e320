//! Modification requests a filter sends at end of body.

use bytes::Bytes;

use crate::types::ActionFlags;

/// Message modification request (`SMFIR_ADDHEADER`, `SMFIR_CHGHEADER`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Append a header.
    AddHeader {
        /// Header name
        name: String,
        /// Header value, already encoded and folded
        value: String,
    },
    /// Change the `index`-th (1-based) occurrence of a header.
    ///
    /// An empty value deletes the header.
    ChangeHeader {
        /// Header name
        name: String,
        /// Occurrence, starting at 1
        index: u32,
        /// New value, empty to delete
        value: String,
    },
    /// Replace the envelope sender.
    ChangeFrom {
        /// New sender address
        from: String,
        /// ESMTP parameters
        params: Option<String>,
    },
    /// Add an envelope recipient.
    AddRcpt {
        /// Recipient address
        rcpt: String,
    },
    /// Remove an envelope recipient.
    DelRcpt {
        /// Recipient address
        rcpt: String,
    },
    /// Replace the message body.
    ReplaceBody {
        /// New body bytes
        body: Bytes,
    },
}

impl Modification {
    /// Builds a header deletion request.
    #[must_use]
    pub fn delete_header(name: impl Into<String>, index: u32) -> Self {
        Self::ChangeHeader {
            name: name.into(),
            index,
            value: String::new(),
        }
    }

    /// Option that has to be negotiated before this request may be sent.
    #[must_use]
    pub const fn required_option(&self) -> ActionFlags {
        match self {
            Self::AddHeader { .. } => ActionFlags::ADDHDRS,
            Self::ChangeHeader { .. } => ActionFlags::CHGHDRS,
            Self::ChangeFrom { .. } => ActionFlags::CHGFROM,
            Self::AddRcpt { .. } => ActionFlags::ADDRCPT,
            Self::DelRcpt { .. } => ActionFlags::DELRCPT,
            Self::ReplaceBody { .. } => ActionFlags::CHGBODY,
        }
    }

    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddHeader { .. } => "addheader",
            Self::ChangeHeader { .. } => "chgheader",
            Self::ChangeFrom { .. } => "chgfrom",
            Self::AddRcpt { .. } => "addrcpt",
            Self::DelRcpt { .. } => "delrcpt",
            Self::ReplaceBody { .. } => "replbody",
        }
    }
}
