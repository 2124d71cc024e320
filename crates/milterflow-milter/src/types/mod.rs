//! Core milter types.

mod action;
mod address;
mod macros;
mod options;
mod reply;

pub use action::Action;
pub use address::{AddressPolicy, clean_address};
pub use macros::Macros;
pub use options::{ActionFlags, Negotiated};
pub use reply::{Reply, ReplyCode, format_reply};
