//! Translation of plugin replies into milter wire replies.

use milterflow_milter::{Action, MilterTransport, ReplyCode, format_reply};

use crate::decision::PhaseReply;

/// Reply text used when a message is deferred without an explanation.
pub const DEFAULT_DEFER_MESSAGE: &str = "internal problem - message deferred";

/// Reply text used when a scanner rejects without an explanation.
pub const DEFAULT_REJECT_MESSAGE: &str = "Rejected by content scanner";

/// Normalized plugin reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    /// Action the plugin asked for.
    pub action: Action,
    /// Reply text, tagged with the message id.
    pub message: String,
    /// What the protocol layer still has to send.
    pub wire: Action,
}

/// Appends ` (<id>)` to a non-empty message that does not mention `id`.
#[must_use]
pub fn tag_message(message: &str, id: &str) -> String {
    let message = message.trim_end();
    if message.is_empty() || id.is_empty() || message.contains(id) {
        message.to_string()
    } else {
        format!("{message} ({id})")
    }
}

/// Sends a custom SMTP reply with a default enhanced code.
///
/// # Errors
///
/// Returns an error if the transport write fails.
pub async fn send_reply_message(
    transport: &mut dyn MilterTransport,
    code: u16,
    xcode: &str,
    message: &str,
) -> milterflow_milter::Result<()> {
    let reply = format_reply(code, xcode, message);
    tracing::debug!(reply = %reply, "sending custom reply");
    transport.send_reply(&reply).await
}

/// Translates a phase plugin reply.
///
/// `TEMPFAIL` and `REJECT` are sent right away as `450`/`550` replies
/// and come back as [`Action::Deferred`]. Everything else passes through.
/// If sending fails the raw action is returned with an empty message.
pub async fn translate(transport: &mut dyn MilterTransport, reply: PhaseReply, id: &str) -> Translated {
    let action = reply.action;
    let message = tag_message(reply.message.as_deref().unwrap_or_default(), id);

    let code = match action {
        Action::TempFail => ReplyCode::TEMPFAIL,
        Action::Reject => ReplyCode::REJECT,
        _ => {
            return Translated {
                action,
                message,
                wire: action,
            };
        }
    };

    match send_reply_message(transport, code.as_u16(), "", &message).await {
        Ok(()) => Translated {
            action,
            message,
            wire: Action::Deferred,
        },
        Err(e) => {
            tracing::error!(%id, error = %e, action = %action, "failed to send reply");
            Translated {
                action,
                message: String::new(),
                wire: action,
            }
        }
    }
}

/// Defers the current message with a `450` reply.
///
/// Transport errors are logged and swallowed, the connection may already
/// be gone.
pub async fn defer(transport: &mut dyn MilterTransport, message: Option<&str>) -> Action {
    let message = message
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_DEFER_MESSAGE);
    if let Err(e) = send_reply_message(transport, ReplyCode::TEMPFAIL.as_u16(), "", message).await {
        tracing::debug!(error = %e, "failed to send defer reply");
    }
    Action::Deferred
}
