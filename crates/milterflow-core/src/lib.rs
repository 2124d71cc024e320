//! # milterflow-core
//!
//! Milter session layer for content filtering.
//!
//! This crate provides:
//! - **Session state machine** - one [`Session`] per MTA connection, driven
//!   by decoded milter commands
//! - **Phase plugins** - [`MilterPlugin`] hooks per SMTP phase, first
//!   decisive reply wins
//! - **Message pipeline** - prependers, scanners and appenders over a
//!   [`Suspect`], optionally on a blocking worker pool
//! - **Reply translation** - plugin decisions mapped to wire actions and
//!   SMTP replies
//! - **Commit engine** - header, body and envelope rewrites per
//!   configured mode
//! - **Server** - TCP listener spawning sessions
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use milterflow_core::{Config, MilterServer, PluginRegistry, ServerContext};
//!
//! let config = Config::load("/etc/milterflow/milterflow.json")?;
//! let registry = PluginRegistry::new().with_plugin(MyScanner::default());
//! let ctx = Arc::new(ServerContext::new(config, registry));
//! MilterServer::bind(ctx, codec).await?.serve().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod commit;
pub mod config;
pub mod decision;
mod error;
pub mod pipeline;
pub mod plugin;
pub mod reply;
pub mod server;
pub mod session;
pub mod suspect;
pub mod timings;
pub mod trash;

pub use commit::{ReplaceFlags, commit};
pub use config::{Config, MilterMode, Modes};
pub use decision::{Decision, PhaseReply, ScanReply};
pub use error::{Error, Result};
pub use pipeline::{Handler, run_phase};
pub use plugin::{
    Appender, MilterPlugin, Phase, PhaseArgs, PluginRegistry, Prepender, ScannerPlugin,
    SyncAdapter, SyncMilterPlugin,
};
pub use reply::{Translated, defer, translate};
pub use server::{MilterServer, ServerContext};
pub use session::Session;
pub use suspect::Suspect;
pub use timings::{TimingKind, Timings};
