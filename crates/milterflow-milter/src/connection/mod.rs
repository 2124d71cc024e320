//! Transport seams between a session and the milter byte codec.
//!
//! The codec itself (frame parsing, option negotiation) lives outside this
//! crate. A session only needs three things from it:
//!
//! - a [`FrameDecoder`] turning received bytes into [`Event`]s
//! - a [`MilterTransport`] to send actions, replies and modifications
//! - a [`CodecFactory`] building both for each accepted connection

mod collecting;

pub use collecting::{CollectingTransport, Transmitted};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncWrite;

use crate::command::Modification;
use crate::error::Result;
use crate::event::Event;
use crate::types::{Action, Negotiated, Reply};

/// Outgoing half of a milter connection.
#[async_trait]
pub trait MilterTransport: Send {
    /// Options agreed on during negotiation.
    fn negotiated(&self) -> Negotiated;

    /// Sends a plain action (`SMFIR_CONTINUE`, `SMFIR_ACCEPT`, ...).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn send_action(&mut self, action: Action) -> Result<()>;

    /// Sends a custom reply (`SMFIR_REPLYCODE`).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn send_reply(&mut self, reply: &Reply) -> Result<()>;

    /// Sends a modification without checking the negotiated options.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn send_modification(&mut self, modification: Modification) -> Result<()>;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting down the stream fails.
    async fn close(&mut self) -> Result<()>;

    /// Sends a modification if its option was negotiated.
    ///
    /// Requests for options that were not negotiated are logged and
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn modify(&mut self, modification: Modification) -> Result<()> {
        let required = modification.required_option();
        if !self.negotiated().supports(required) {
            tracing::warn!(
                action = modification.name(),
                "milter action not negotiated, skipping"
            );
            return Ok(());
        }
        self.send_modification(modification).await
    }
}

/// Incoming half of a milter connection.
pub trait FrameDecoder: Send {
    /// Decodes every complete frame in `buf`, leaving partial frames in place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Protocol`] on an undecodable frame.
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Vec<Event>>;
}

/// Boxed writer handed to a [`CodecFactory`].
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Builds the codec pair for a freshly accepted connection.
pub trait CodecFactory: Send + Sync {
    /// Wraps the write half of a connection.
    fn open(&self, writer: BoxedWriter) -> (Box<dyn FrameDecoder>, Box<dyn MilterTransport>);
}
