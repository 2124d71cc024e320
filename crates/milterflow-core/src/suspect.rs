//! The message under evaluation.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use milterflow_mime::{Headers, Message};
use serde_json::{Map, Value};

use crate::config::tokens;
use crate::decision::Decision;
use crate::error::Result;

/// Tag collecting plugin failures.
pub const TAG_PROCESSING_ERRORS: &str = "processingerrors";
/// Tag that disables appenders for a message.
pub const TAG_NO_APPENDERS: &str = "noappenders";
/// Tag naming what the commit engine should rewrite.
pub const TAG_MILTER_REPLACE: &str = "milter_replace";
/// Tag holding the listener port.
pub const TAG_INCOMING_PORT: &str = "incomingport";
/// Tag holding per-plugin spam verdicts.
pub const TAG_SPAM: &str = "spam";

/// Client details copied from the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// HELO name.
    pub helo: Option<String>,
    /// Client address.
    pub addr: Option<String>,
    /// Forward-confirmed reverse DNS name.
    pub fcrdns: Option<String>,
}

/// One message, built at end of body and dropped after appenders ran.
#[derive(Debug, Clone, Default)]
pub struct Suspect {
    /// Message id.
    pub id: String,
    /// Envelope sender, plugins may change it.
    pub from_address: String,
    /// Envelope recipients, plugins may change them.
    pub recipients: Vec<String>,
    original_from: String,
    original_recipients: Vec<String>,
    inbuffer: Bytes,
    source: Option<Vec<u8>>,
    /// Headers added by the commit engine regardless of mode.
    pub addheaders: Headers,
    added_headers: Headers,
    modified_headers: Headers,
    /// Free-form tags shared between plugins.
    pub tags: Map<String, Value>,
    /// Decision of every scanner that ran, in order.
    pub decisions: Vec<(String, Decision)>,
    /// Time spent per scanner, in seconds.
    pub scantimes: Vec<(String, f64)>,
    /// SASL login name.
    pub sasl_login: Option<String>,
    /// SASL authorized sender.
    pub sasl_sender: Option<String>,
    /// SASL mechanism.
    pub sasl_method: Option<String>,
    /// MTA queue id.
    pub queue_id: Option<String>,
    /// Connecting client.
    pub client_info: ClientInfo,
    /// Scratch directory for plugins.
    pub tempdir: PathBuf,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// Returns a fresh message id (uuid4, hex).
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Suspect {
    /// Creates a suspect from the envelope and the raw message.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        from_address: impl Into<String>,
        recipients: Vec<String>,
        inbuffer: Bytes,
    ) -> Self {
        let from_address = from_address.into();
        Self {
            id: id.into(),
            original_from: from_address.clone(),
            from_address,
            original_recipients: recipients.clone(),
            recipients,
            inbuffer,
            timestamp: Utc::now(),
            ..Self::default()
        }
    }

    /// Raw message, the replacement if one was set.
    #[must_use]
    pub fn source(&self) -> &[u8] {
        self.source.as_deref().unwrap_or(&self.inbuffer)
    }

    /// Message as received from the MTA.
    #[must_use]
    pub fn original_source(&self) -> &[u8] {
        &self.inbuffer
    }

    /// Replaces the raw message.
    pub fn set_source(&mut self, source: Vec<u8>) {
        self.source = Some(source);
    }

    /// Parses the current source.
    ///
    /// # Errors
    ///
    /// Returns an error if the header block is malformed.
    pub fn message_rep(&self) -> Result<Message> {
        Ok(Message::parse(self.source())?)
    }

    /// Replaces the source with a regenerated message.
    pub fn set_message_rep(&mut self, message: &Message) {
        self.set_source(message.to_bytes());
    }

    /// Returns true if the source was replaced.
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.source.is_some()
    }

    /// Returns true if plugins changed the envelope sender.
    #[must_use]
    pub fn from_address_changed(&self) -> bool {
        self.from_address != self.original_from
    }

    /// Returns true if plugins changed the envelope recipients.
    #[must_use]
    pub fn recipients_changed(&self) -> bool {
        self.recipients != self.original_recipients
    }

    /// Adds a header.
    ///
    /// With `immediate` the header is prepended to the source right away
    /// and remembered as added; otherwise it is queued in `addheaders`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be parsed.
    pub fn add_header(&mut self, name: &str, value: &str, immediate: bool) -> Result<()> {
        if !immediate {
            self.addheaders.set(name, value);
            return Ok(());
        }
        let mut message = self.message_rep()?;
        message.headers.prepend(name, value);
        self.set_message_rep(&message);
        self.added_headers.set(name, value);
        Ok(())
    }

    /// Changes the first header called `name` and remembers the change.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be parsed.
    pub fn modify_header(&mut self, name: &str, value: &str) -> Result<()> {
        let mut message = self.message_rep()?;
        message.headers.set(name, value);
        self.set_message_rep(&message);
        self.modified_headers.set(name, value);
        Ok(())
    }

    /// Headers prepended with [`Suspect::add_header`] (`immediate`).
    #[must_use]
    pub const fn added_headers(&self) -> &Headers {
        &self.added_headers
    }

    /// Headers changed with [`Suspect::modify_header`].
    #[must_use]
    pub const fn modified_headers(&self) -> &Headers {
        &self.modified_headers
    }

    /// Looks up a tag.
    #[must_use]
    pub fn get_tag(&self, name: &str) -> Option<&Value> {
        self.tags.get(name)
    }

    /// Sets a tag.
    pub fn set_tag(&mut self, name: &str, value: impl Into<Value>) {
        self.tags.insert(name.to_string(), value.into());
    }

    /// Appends `error` to the `processingerrors` tag.
    pub fn record_error(&mut self, error: impl Into<String>) {
        let entry = self
            .tags
            .entry(TAG_PROCESSING_ERRORS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(errors) = entry {
            errors.push(Value::String(error.into()));
        }
    }

    /// Recorded plugin failures.
    #[must_use]
    pub fn processing_errors(&self) -> Vec<&str> {
        match self.tags.get(TAG_PROCESSING_ERRORS) {
            Some(Value::Array(errors)) => errors.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Records the spam verdict of `plugin`.
    pub fn set_spam(&mut self, plugin: &str, spam: bool) {
        let entry = self
            .tags
            .entry(TAG_SPAM)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(verdicts) = entry {
            verdicts.insert(plugin.to_string(), Value::Bool(spam));
        }
    }

    /// Returns true if any plugin flagged the message as spam.
    #[must_use]
    pub fn is_spam(&self) -> bool {
        match self.tags.get(TAG_SPAM) {
            Some(Value::Object(verdicts)) => verdicts.values().any(|v| v.as_bool() == Some(true)),
            Some(Value::Bool(spam)) => *spam,
            _ => false,
        }
    }

    /// Returns true if appenders must not run for this message.
    #[must_use]
    pub fn noappenders(&self) -> bool {
        match self.tags.get(TAG_NO_APPENDERS) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Tokens of the `milter_replace` tag.
    #[must_use]
    pub fn replace_tokens(&self) -> Vec<String> {
        match self.tags.get(TAG_MILTER_REPLACE) {
            Some(Value::String(s)) => tokens(s),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .flat_map(tokens)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Size of the current source in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.source().len()
    }

    /// First envelope recipient.
    #[must_use]
    pub fn to_address(&self) -> Option<&str> {
        self.recipients.first().map(String::as_str)
    }

    /// Domain of the envelope sender.
    #[must_use]
    pub fn from_domain(&self) -> Option<&str> {
        self.from_address.rsplit_once('@').map(|(_, d)| d)
    }
}

impl fmt::Display for Suspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Suspect {}: from={} to={} size={} spam={} modified={} decisions=[",
            self.id,
            self.from_address,
            self.recipients.join(","),
            self.size(),
            if self.is_spam() { "yes" } else { "no" },
            if self.is_modified() { "yes" } else { "no" },
        )?;
        for (i, (plugin, decision)) in self.decisions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{plugin}:{decision}")?;
        }
        f.write_str("]")
    }
}
