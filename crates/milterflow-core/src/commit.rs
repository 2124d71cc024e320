//! Message commit engine.
//!
//! Decides what to rewrite from three layered sources, each only able to
//! turn a flag on:
//!
//! 1. `auto` mode: whatever the plugins changed
//! 2. `manual` mode: `milter_mode_options`
//! 3. `tags` mode: the `milter_replace` tag
//!
//! and sends the matching modification requests.

use bytes::Bytes;
use milterflow_milter::Modification;
use milterflow_mime::{Headers, split_body};

use crate::config::{MilterMode, Modes};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::suspect::Suspect;

/// Parts of the message to rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceFlags {
    /// Replace every header.
    pub headers: bool,
    /// Replace the body.
    pub body: bool,
    /// Replace the envelope sender.
    pub from: bool,
    /// Replace the envelope recipients.
    pub to: bool,
}

impl ReplaceFlags {
    /// Turns on the flags named in `tokens` (`all`, `body`, `headers`,
    /// `from`, `to`). Unknown tokens are ignored.
    pub fn apply_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) {
        for token in tokens {
            match token.as_ref() {
                "all" => {
                    self.headers = true;
                    self.body = true;
                    self.from = true;
                    self.to = true;
                }
                "body" => self.body = true,
                "headers" => self.headers = true,
                "from" => self.from = true,
                "to" => self.to = true,
                other => tracing::debug!(token = other, "ignoring unknown replace option"),
            }
        }
    }

    /// Computes the flags for `suspect`. `None` in readonly mode.
    #[must_use]
    pub fn resolve(modes: &Modes, suspect: &Suspect) -> Option<Self> {
        if modes.contains(MilterMode::Readonly) {
            return None;
        }

        let mut flags = Self::default();
        if modes.contains(MilterMode::Auto) {
            flags.body = suspect.is_modified();
            flags.from = suspect.from_address_changed();
            flags.to = suspect.recipients_changed();
            tracing::debug!(id = %suspect.id, ?flags, "mode auto");
        }
        if modes.contains(MilterMode::Manual) {
            flags.apply_tokens(modes.options());
            tracing::debug!(id = %suspect.id, ?flags, "mode manual");
        }
        if modes.contains(MilterMode::Tags) {
            flags.apply_tokens(&suspect.replace_tokens());
            tracing::debug!(id = %suspect.id, ?flags, "mode tags");
        }
        Some(flags)
    }
}

/// Sends the modifications requested for `suspect`.
///
/// # Errors
///
/// Returns [`Error::Commit`] if the message cannot be regenerated or a
/// modification cannot be sent.
pub async fn commit(sess: &mut Session, suspect: &Suspect) -> Result<()> {
    let ctx = std::sync::Arc::clone(sess.context());
    let Some(flags) = ReplaceFlags::resolve(&ctx.modes, suspect) else {
        return Ok(());
    };
    let auto = ctx.modes.contains(MilterMode::Auto);
    let id = suspect.id.as_str();

    if flags.from {
        tracing::warn!(%id, from = %suspect.from_address, "set new envelope sender");
        send(
            sess,
            Modification::ChangeFrom {
                from: suspect.from_address.clone(),
                params: None,
            },
        )
        .await?;
    }

    if flags.to {
        for rcpt in std::mem::take(&mut sess.recipients) {
            tracing::debug!(%id, %rcpt, "remove envelope recipient");
            send(sess, Modification::DelRcpt { rcpt }).await?;
        }
        tracing::warn!(%id, count = suspect.recipients.len(), "reset envelope recipients");
        for rcpt in &suspect.recipients {
            send(sess, Modification::AddRcpt { rcpt: rcpt.clone() }).await?;
        }
    }

    if auto && !flags.headers {
        let added = suspect.added_headers();
        let modified = suspect.modified_headers();
        if !added.is_empty() || !modified.is_empty() {
            tracing::warn!(
                %id,
                added = added.len(),
                modified = modified.len(),
                "apply tracked header changes"
            );
        }
        for (name, value) in added.iter() {
            send(sess, add_header(name, value)).await?;
        }
        for (name, value) in modified.iter() {
            send(
                sess,
                Modification::ChangeHeader {
                    name: name.to_string(),
                    index: 1,
                    value: Headers::encode_value(name, value),
                },
            )
            .await?;
        }
    }

    if flags.headers {
        let originals = std::mem::take(&mut sess.original_headers);
        tracing::warn!(%id, count = originals.len(), "remove original headers");
        for (name, _) in originals {
            send(sess, Modification::delete_header(name, 1)).await?;
        }

        let message = suspect
            .message_rep()
            .map_err(|e| Error::Commit(format!("cannot regenerate message: {e}")))?;
        tracing::warn!(%id, count = message.headers.len(), "add headers from message");
        for (name, value) in message.headers.iter() {
            send(sess, add_header(name, value)).await?;
        }
    }

    if !suspect.addheaders.is_empty() {
        tracing::info!(%id, count = suspect.addheaders.len(), "add queued headers");
    }
    for (name, value) in suspect.addheaders.iter() {
        send(sess, add_header(name, value)).await?;
    }

    if flags.body {
        let message = suspect
            .message_rep()
            .map_err(|e| Error::Commit(format!("cannot regenerate message: {e}")))?;
        let regenerated = message.to_bytes();
        let body = Bytes::copy_from_slice(split_body(&regenerated));
        tracing::warn!(%id, size = body.len(), "replace message body");
        send(sess, Modification::ReplaceBody { body }).await?;
    }

    Ok(())
}

fn add_header(name: &str, value: &str) -> Modification {
    Modification::AddHeader {
        name: name.to_string(),
        value: Headers::encode_value(name, value),
    }
}

async fn send(sess: &mut Session, modification: Modification) -> Result<()> {
    let name = modification.name();
    sess.transport_mut()
        .modify(modification)
        .await
        .map_err(|e| Error::Commit(format!("{name}: {e}")))
}
