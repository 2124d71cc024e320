//! Plugin capability traits.
//!
//! Two families of plugins exist:
//!
//! - phase plugins ([`MilterPlugin`]) run during the SMTP dialogue and
//!   answer with a wire action
//! - message plugins ([`Prepender`], [`ScannerPlugin`], [`Appender`]) run
//!   at end of body on the complete [`Suspect`]
//!
//! Message plugins are synchronous and may be moved to a blocking worker.
//! Synchronous phase plugins are wrapped in [`SyncAdapter`] so the session
//! awaits every phase plugin the same way.

mod registry;

pub use registry::PluginRegistry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::decision::{Decision, PhaseReply, ScanReply};
use crate::session::Session;
use crate::suspect::Suspect;

/// SMTP phase a phase plugin can take part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Client connected.
    Connect,
    /// HELO/EHLO.
    Helo,
    /// MAIL FROM.
    MailFrom,
    /// RCPT TO.
    Rcpt,
    /// One header.
    Header,
    /// End of headers.
    Eoh,
    /// End of body.
    Eob,
}

impl Phase {
    /// Every phase, in dialogue order.
    pub const ALL: [Self; 7] = [
        Self::Connect,
        Self::Helo,
        Self::MailFrom,
        Self::Rcpt,
        Self::Header,
        Self::Eoh,
        Self::Eob,
    ];

    /// Phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Helo => "helo",
            Self::MailFrom => "mailfrom",
            Self::Rcpt => "rcpt",
            Self::Header => "header",
            Self::Eoh => "eoh",
            Self::Eob => "eob",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments handed to a phase plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseArgs<'a> {
    /// Client hostname and address.
    Connect {
        /// Hostname, `unknown` if unresolved.
        host: &'a str,
        /// Client address.
        addr: &'a str,
    },
    /// HELO name.
    Helo {
        /// HELO argument.
        name: &'a str,
    },
    /// Cleaned envelope sender.
    MailFrom {
        /// Sender, empty for the null sender.
        sender: &'a str,
    },
    /// Cleaned envelope recipient.
    Rcpt {
        /// Recipient.
        recipient: &'a str,
    },
    /// One header.
    Header {
        /// Header name.
        name: &'a str,
        /// Header value.
        value: &'a str,
    },
    /// End of headers.
    Eoh,
    /// End of body.
    Eob,
}

impl PhaseArgs<'_> {
    /// Phase these arguments belong to.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Connect { .. } => Phase::Connect,
            Self::Helo { .. } => Phase::Helo,
            Self::MailFrom { .. } => Phase::MailFrom,
            Self::Rcpt { .. } => Phase::Rcpt,
            Self::Header { .. } => Phase::Header,
            Self::Eoh => Phase::Eoh,
            Self::Eob => Phase::Eob,
        }
    }
}

/// Plugin running during the SMTP dialogue.
///
/// Every method defaults to `CONTINUE`; a plugin implements the phases it
/// was registered for. Returning `Err` aborts the session.
#[async_trait]
pub trait MilterPlugin: Send + Sync {
    /// Plugin name, used for skipping, logging and timings.
    fn name(&self) -> &str;

    /// Client connected.
    async fn examine_connect(
        &self,
        _sess: &mut Session,
        _host: &str,
        _addr: &str,
    ) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }

    /// HELO/EHLO.
    async fn examine_helo(&self, _sess: &mut Session, _helo: &str) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }

    /// MAIL FROM.
    async fn examine_mailfrom(
        &self,
        _sess: &mut Session,
        _sender: &str,
    ) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }

    /// RCPT TO.
    async fn examine_rcpt(
        &self,
        _sess: &mut Session,
        _recipient: &str,
    ) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }

    /// One header.
    async fn examine_header(
        &self,
        _sess: &mut Session,
        _name: &str,
        _value: &str,
    ) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }

    /// End of headers.
    async fn examine_eoh(&self, _sess: &mut Session) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }

    /// End of body, before the message plugins run.
    async fn examine_eob(&self, _sess: &mut Session) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }
}

/// Calls the method of `plugin` matching `args`.
///
/// # Errors
///
/// Returns whatever the plugin returned.
pub async fn examine(
    plugin: &dyn MilterPlugin,
    sess: &mut Session,
    args: PhaseArgs<'_>,
) -> anyhow::Result<PhaseReply> {
    match args {
        PhaseArgs::Connect { host, addr } => plugin.examine_connect(sess, host, addr).await,
        PhaseArgs::Helo { name } => plugin.examine_helo(sess, name).await,
        PhaseArgs::MailFrom { sender } => plugin.examine_mailfrom(sess, sender).await,
        PhaseArgs::Rcpt { recipient } => plugin.examine_rcpt(sess, recipient).await,
        PhaseArgs::Header { name, value } => plugin.examine_header(sess, name, value).await,
        PhaseArgs::Eoh => plugin.examine_eoh(sess).await,
        PhaseArgs::Eob => plugin.examine_eob(sess).await,
    }
}

/// Phase plugin with a synchronous body.
///
/// Wrap it in [`SyncAdapter`] to register it.
pub trait SyncMilterPlugin: Send + Sync {
    /// Plugin name.
    fn name(&self) -> &str;

    /// Examines one phase. Defaults to `CONTINUE`.
    ///
    /// # Errors
    ///
    /// An error aborts the session.
    fn examine(&self, _sess: &mut Session, _args: PhaseArgs<'_>) -> anyhow::Result<PhaseReply> {
        Ok(PhaseReply::cont())
    }
}

/// Runs a [`SyncMilterPlugin`] through the asynchronous contract.
#[derive(Debug, Clone)]
pub struct SyncAdapter<P>(pub P);

#[async_trait]
impl<P: SyncMilterPlugin> MilterPlugin for SyncAdapter<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn examine_connect(
        &self,
        sess: &mut Session,
        host: &str,
        addr: &str,
    ) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::Connect { host, addr })
    }

    async fn examine_helo(&self, sess: &mut Session, helo: &str) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::Helo { name: helo })
    }

    async fn examine_mailfrom(&self, sess: &mut Session, sender: &str) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::MailFrom { sender })
    }

    async fn examine_rcpt(&self, sess: &mut Session, recipient: &str) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::Rcpt { recipient })
    }

    async fn examine_header(
        &self,
        sess: &mut Session,
        name: &str,
        value: &str,
    ) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::Header { name, value })
    }

    async fn examine_eoh(&self, sess: &mut Session) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::Eoh)
    }

    async fn examine_eob(&self, sess: &mut Session) -> anyhow::Result<PhaseReply> {
        self.0.examine(sess, PhaseArgs::Eob)
    }
}

/// Ordered scanner list for one message.
pub type PluginList = Vec<Arc<dyn ScannerPlugin>>;

/// Ordered appender list for one message.
pub type AppenderList = Vec<Arc<dyn Appender>>;

/// Content scanner run on the complete message.
pub trait ScannerPlugin: Send + Sync {
    /// Plugin name.
    fn name(&self) -> &str;

    /// Scans the message.
    ///
    /// # Errors
    ///
    /// Errors are logged and recorded on the suspect; the pipeline goes on.
    fn examine(&self, suspect: &mut Suspect) -> anyhow::Result<ScanReply>;
}

/// Chooses which scanners and appenders run for a message.
pub trait Prepender: Send + Sync {
    /// Plugin name.
    fn name(&self) -> &str;

    /// Returns a replacement scanner list, `None` keeps `plugins`.
    ///
    /// # Errors
    ///
    /// Errors are logged and recorded; the previous list is kept.
    fn plugin_list(
        &self,
        _suspect: &mut Suspect,
        _plugins: &[Arc<dyn ScannerPlugin>],
    ) -> anyhow::Result<Option<PluginList>> {
        Ok(None)
    }

    /// Returns a replacement appender list, `None` keeps `appenders`.
    ///
    /// # Errors
    ///
    /// Errors are logged and recorded; the previous list is kept.
    fn appender_list(
        &self,
        _suspect: &mut Suspect,
        _appenders: &[Arc<dyn Appender>],
    ) -> anyhow::Result<Option<AppenderList>> {
        Ok(None)
    }
}

/// Runs after the final decision, for every message that was not deferred.
pub trait Appender: Send + Sync {
    /// Plugin name.
    fn name(&self) -> &str;

    /// Processes the message.
    ///
    /// # Errors
    ///
    /// Errors are logged and recorded; the other appenders still run.
    fn process(&self, suspect: &mut Suspect, decision: Decision) -> anyhow::Result<()>;
}
