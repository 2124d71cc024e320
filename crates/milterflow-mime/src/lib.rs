//! # milterflow-mime
//!
//! Minimal message model used while a message is being scanned.
//!
//! ## Features
//!
//! - **Ordered headers**: Case-preserving header list with case-insensitive lookup
//! - **Message parsing**: Header block parsed, body kept as raw bytes
//! - **Regeneration**: Byte-exact output for unmodified messages
//! - **Header encoding**: RFC 2047 encoded words and header folding
//!
//! ## Quick Start
//!
//! ```ignore
//! use milterflow_mime::{Message, split_body};
//!
//! let mut message = Message::parse(b"Subject: Test\r\n\r\nHello\r\n")?;
//! message.headers.prepend("X-Scanned", "yes");
//!
//! let regenerated = message.to_bytes();
//! assert_eq!(split_body(&regenerated), b"Hello\r\n");
//! ```
//!
//! ### Encoding header values
//!
//! ```ignore
//! use milterflow_mime::encoding::encode_header_value;
//!
//! let value = encode_header_value("X-Note", "Grüße");
//! assert!(value.starts_with("=?utf-8?B?"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod header;
mod message;

pub mod encoding;

pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, body_offset, split_body};
