//! # milterflow-milter
//!
//! Milter protocol vocabulary used by the milterflow session layer.
//!
//! ## Features
//!
//! - **Wire actions**: `CONTINUE`, `ACCEPT`, `REJECT`, `TEMPFAIL`, `DISCARD`
//!   plus the `Deferred` marker for "reply already sent"
//! - **Custom replies**: SMTP reply codes with enhanced status code defaults
//! - **Option negotiation**: `SMFIF_*` masks and a guard for modifications
//! - **Envelope addresses**: cleaning and compliance policies
//! - **Transport seams**: decoder, transport and factory traits
//!
//! Byte-level framing is provided by whatever implements [`FrameDecoder`]
//! and [`MilterTransport`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use milterflow_milter::{Action, MilterTransport, format_reply};
//!
//! async fn reject(transport: &mut dyn MilterTransport) -> milterflow_milter::Result<Action> {
//!     transport.send_reply(&format_reply(550, "", "go away")).await?;
//!     Ok(Action::Deferred)
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Modification requests
//! - [`connection`]: Transport seams and a recording transport
//! - [`event`]: Decoded MTA commands
//! - [`types`]: Actions, replies, addresses, macros, option masks

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod event;
pub mod types;

pub use command::Modification;
pub use connection::{
    BoxedWriter, CodecFactory, CollectingTransport, FrameDecoder, MilterTransport, Transmitted,
};
pub use error::{Error, Result};
pub use event::{Event, Family};
pub use types::{
    Action, ActionFlags, AddressPolicy, Macros, Negotiated, Reply, ReplyCode, clean_address,
    format_reply,
};
