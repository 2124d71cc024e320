//! Negotiated milter option masks.

bitflags::bitflags! {
    /// Modification actions a filter may request (`SMFIF_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActionFlags: u32 {
        /// Add headers.
        const ADDHDRS = 0x0001;
        /// Replace the body.
        const CHGBODY = 0x0002;
        /// Add recipients.
        const ADDRCPT = 0x0004;
        /// Delete recipients.
        const DELRCPT = 0x0008;
        /// Change or delete headers.
        const CHGHDRS = 0x0010;
        /// Quarantine the message.
        const QUARANTINE = 0x0020;
        /// Change the envelope sender.
        const CHGFROM = 0x0040;
        /// Add recipients with ESMTP parameters.
        const ADDRCPT_PAR = 0x0080;
        /// Request a macro list.
        const SETSYMLIST = 0x0100;
    }
}

impl ActionFlags {
    /// Everything a rewriting filter asks for.
    pub const REWRITE: Self = Self::ADDHDRS
        .union(Self::CHGBODY)
        .union(Self::ADDRCPT)
        .union(Self::DELRCPT)
        .union(Self::CHGHDRS)
        .union(Self::CHGFROM);
}

/// Option masks offered by the MTA and requested by the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// Actions the filter asked for.
    pub filter: ActionFlags,
    /// Actions the MTA offered.
    pub mta: ActionFlags,
}

impl Negotiated {
    /// Creates a negotiation result.
    #[must_use]
    pub const fn new(filter: ActionFlags, mta: ActionFlags) -> Self {
        Self { filter, mta }
    }

    /// Both sides agree on every action.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            filter: ActionFlags::all(),
            mta: ActionFlags::all(),
        }
    }

    /// Actions usable on this connection.
    #[must_use]
    pub const fn effective(&self) -> ActionFlags {
        self.filter.intersection(self.mta)
    }

    /// Returns true if `flag` was requested by the filter and offered by the MTA.
    #[must_use]
    pub const fn supports(&self, flag: ActionFlags) -> bool {
        self.effective().contains(flag)
    }
}
