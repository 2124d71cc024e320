//! Per-connection milter session.
//!
//! One [`Session`] lives as long as the MTA connection and may carry several
//! messages. Connection-scoped fields (client address, HELO, TLS and SASL
//! details) are write-once; message-scoped fields are cleared by
//! [`Session::reset_connection`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use milterflow_milter::{Action, Event, Family, FrameDecoder, Macros, MilterTransport, clean_address};
use milterflow_mime::Headers;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::commit::commit;
use crate::decision::{Decision, PhaseReply};
use crate::error::Result;
use crate::pipeline::{Handler, run_phase};
use crate::plugin::PhaseArgs;
use crate::reply::{self, DEFAULT_REJECT_MESSAGE, send_reply_message, tag_message, translate};
use crate::server::ServerContext;
use crate::suspect::{ClientInfo, Suspect, TAG_INCOMING_PORT, generate_id};
use crate::timings::TimingKind;

/// Log target of the queue id line.
pub const QUEUEID_TARGET: &str = "milterflow::queueid";

/// Session tag listing phase plugins to skip.
pub const TAG_SKIP_PLUGINS: &str = "skipmplugins";

/// Bytes read from the MTA at once.
const CHUNK_SIZE: usize = 65535;

/// One MTA connection.
pub struct Session {
    pub(crate) handler: Handler,
    transport: Box<dyn MilterTransport>,
    id: Option<String>,

    heloname: Option<String>,
    addr: Option<String>,
    fcrdns: Option<String>,
    ptr: Option<String>,
    sasl_login: Option<String>,
    sasl_sender: Option<String>,
    sasl_method: Option<String>,
    cipher: Option<String>,
    cipher_bits: Option<String>,
    cert_subject: Option<String>,
    cert_issuer: Option<String>,
    tls_version: Option<String>,

    queueid: Option<String>,
    sender: Option<String>,
    pub(crate) recipients: Vec<String>,
    pub(crate) original_headers: Vec<(String, String)>,
    buffer: BytesMut,
    addheaders: Headers,
    tags: Map<String, Value>,
    message_count: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("heloname", &self.heloname)
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("message_count", &self.message_count)
            .finish_non_exhaustive()
    }
}

fn set_once(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none()
        && let Some(value) = value.filter(|v| !v.is_empty())
    {
        *slot = Some(value.to_string());
    }
}

fn domain_of(address: &str) -> Option<String> {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
}

impl Session {
    /// Creates a session with a fresh message id.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, transport: Box<dyn MilterTransport>) -> Self {
        Self {
            handler: Handler::new(ctx),
            transport,
            id: Some(generate_id()),
            heloname: None,
            addr: None,
            fcrdns: None,
            ptr: None,
            sasl_login: None,
            sasl_sender: None,
            sasl_method: None,
            cipher: None,
            cipher_bits: None,
            cert_subject: None,
            cert_issuer: None,
            tls_version: None,
            queueid: None,
            sender: None,
            recipients: Vec::new(),
            original_headers: Vec::new(),
            buffer: BytesMut::new(),
            addheaders: Headers::new(),
            tags: Map::new(),
            message_count: 0,
        }
    }

    /// Shared server context.
    #[must_use]
    pub const fn context(&self) -> &Arc<ServerContext> {
        self.handler.context()
    }

    /// Pipeline handler of this session.
    #[must_use]
    pub const fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Outgoing half of the connection.
    pub fn transport_mut(&mut self) -> &mut dyn MilterTransport {
        self.transport.as_mut()
    }

    /// Current message id, `None` between messages.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Current message id, empty between messages.
    #[must_use]
    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// HELO name.
    #[must_use]
    pub fn heloname(&self) -> Option<&str> {
        self.heloname.as_deref()
    }

    /// Client address.
    #[must_use]
    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    /// Forward-confirmed reverse DNS name, `unknown` if unresolved.
    #[must_use]
    pub fn fcrdns(&self) -> Option<&str> {
        self.fcrdns.as_deref()
    }

    /// PTR name of the client.
    #[must_use]
    pub fn ptr(&self) -> Option<&str> {
        self.ptr.as_deref()
    }

    /// MTA queue id.
    #[must_use]
    pub fn queueid(&self) -> Option<&str> {
        self.queueid.as_deref()
    }

    /// SASL login name.
    #[must_use]
    pub fn sasl_login(&self) -> Option<&str> {
        self.sasl_login.as_deref()
    }

    /// SASL authorized sender.
    #[must_use]
    pub fn sasl_sender(&self) -> Option<&str> {
        self.sasl_sender.as_deref()
    }

    /// SASL mechanism.
    #[must_use]
    pub fn sasl_method(&self) -> Option<&str> {
        self.sasl_method.as_deref()
    }

    /// TLS cipher.
    #[must_use]
    pub fn cipher(&self) -> Option<&str> {
        self.cipher.as_deref()
    }

    /// TLS protocol version.
    #[must_use]
    pub fn tls_version(&self) -> Option<&str> {
        self.tls_version.as_deref()
    }

    /// Cleaned envelope sender, empty for the null sender.
    #[must_use]
    pub fn from_address(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Lower-cased domain of the sender.
    #[must_use]
    pub fn from_domain(&self) -> Option<String> {
        self.sender.as_deref().and_then(domain_of)
    }

    /// Envelope recipients accepted so far.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Latest recipient.
    #[must_use]
    pub fn to_address(&self) -> Option<&str> {
        self.recipients.last().map(String::as_str)
    }

    /// Lower-cased domain of the latest recipient.
    #[must_use]
    pub fn to_domain(&self) -> Option<String> {
        self.to_address().and_then(domain_of)
    }

    /// Headers as received, in order.
    #[must_use]
    pub fn original_headers(&self) -> &[(String, String)] {
        &self.original_headers
    }

    /// Raw message received so far.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Size of the message received so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Session tags, copied into the suspect at end of body.
    #[must_use]
    pub const fn tags(&self) -> &Map<String, Value> {
        &self.tags
    }

    /// Mutable session tags.
    pub fn tags_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.tags
    }

    /// Headers queued with [`Session::add_header`].
    #[must_use]
    pub const fn queued_headers(&self) -> &Headers {
        &self.addheaders
    }

    /// Messages seen on this connection.
    #[must_use]
    pub const fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Queues a header for the commit, replacing a queued header of the
    /// same name.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.addheaders.set(name, value);
    }

    /// Adds `plugin` to the skip list of this message.
    pub fn add_plugin_skip(&mut self, plugin: &str) {
        let value = match self.tags.get(TAG_SKIP_PLUGINS).and_then(Value::as_str) {
            Some(current) if !current.is_empty() => format!("{current},{plugin}"),
            _ => plugin.to_string(),
        };
        self.tags
            .insert(TAG_SKIP_PLUGINS.to_string(), Value::String(value));
    }

    /// Returns true if `plugin` is on the skip list.
    #[must_use]
    pub fn skip_plugin(&self, plugin: &str) -> bool {
        self.tags
            .get(TAG_SKIP_PLUGINS)
            .and_then(Value::as_str)
            .is_some_and(|list| crate::config::tokens(list).iter().any(|p| p.eq_ignore_ascii_case(plugin)))
    }

    /// Values for reply and log templates. Unknown values are left out.
    #[must_use]
    pub fn template_values(&self) -> BTreeMap<&'static str, String> {
        let mut values = BTreeMap::new();
        let mut put = |key: &'static str, value: Option<&str>| {
            if let Some(value) = value {
                values.insert(key, value.to_string());
            }
        };
        put("id", self.id());
        put("heloname", self.heloname());
        put("fcrdns", self.fcrdns());
        put("ptr", self.ptr());
        put("addr", self.addr());
        put("queueid", self.queueid());
        put("sasl_login", self.sasl_login());
        put("sasl_sender", self.sasl_sender());
        put("from_address", self.from_address().filter(|a| !a.is_empty()));
        put("from_domain", self.from_domain().as_deref());
        put("to_address", self.to_address());
        put("to_domain", self.to_domain().as_deref());
        put("cipher", self.cipher());
        put("cipher_bits", self.cipher_bits.as_deref());
        put("cert_subject", self.cert_subject.as_deref());
        put("cert_issuer", self.cert_issuer.as_deref());
        put("tls_version", self.tls_version());
        values.insert("size", self.size().to_string());
        values
    }

    /// Absorbs queue id, SASL, PTR and TLS details. Values already set are
    /// kept.
    pub fn store_info_from_macros(&mut self, macros: &Macros) {
        if self.queueid.is_none()
            && let Some(queueid) = macros.get_nonempty("i")
        {
            self.queueid = Some(queueid.to_string());
            tracing::info!(target: QUEUEID_TARGET, "\"{}\" \"{}\"", self.id_str(), queueid);
        }
        set_once(&mut self.sasl_login, macros.get("auth_authen"));
        set_once(&mut self.sasl_sender, macros.get("auth_author"));
        set_once(&mut self.sasl_method, macros.get("auth_type"));
        set_once(
            &mut self.ptr,
            macros.get("_").and_then(|v| v.split_whitespace().next()),
        );
        set_once(&mut self.cipher, macros.get("cipher"));
        set_once(&mut self.cipher_bits, macros.get("cipher_bits"));
        set_once(&mut self.cert_subject, macros.get("cert_subject"));
        set_once(&mut self.cert_issuer, macros.get("cert_issuer"));
        set_once(&mut self.tls_version, macros.get("tls_version"));
    }

    /// Prepares the session for the next message on this connection.
    ///
    /// Client details, HELO and SASL identity are kept.
    pub fn reset_connection(&mut self) {
        if let Some(id) = &self.id {
            self.handler.timings.report(id, true);
        }
        self.queueid = None;
        self.sender = None;
        self.recipients.clear();
        self.original_headers.clear();
        self.buffer.clear();
        self.addheaders = Headers::new();
        self.tags.clear();
        self.handler.action = Decision::Dunno;
        self.handler.message = None;
        self.id = Some(generate_id());
        self.handler.timings.reset();
        tracing::debug!(id = %self.id_str(), "new message id");
    }

    /// `SMFIC_CONNECT`.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails.
    pub async fn connect(
        &mut self,
        hostname: &str,
        family: Family,
        addr: &str,
        port: u16,
        macros: &Macros,
    ) -> Result<Action> {
        self.store_info_from_macros(macros);
        if !family.is_inet() {
            tracing::error!(id = %self.id_str(), ?family, "unsupported address family, tempfail");
            return Ok(Action::TempFail);
        }

        let host = if hostname.is_empty() || hostname == format!("[{addr}]") {
            "unknown"
        } else {
            hostname
        };
        set_once(&mut self.fcrdns, Some(host));
        set_once(&mut self.addr, Some(addr));

        tracing::info!(
            id = %self.id_str(),
            phase = "connect",
            ip = addr,
            port,
            fcrdns = host,
            ptr = self.ptr.as_deref().unwrap_or("None"),
            "client connected"
        );

        self.handler.timings.track("connect", TimingKind::Overhead);
        let host = host.to_string();
        run_phase(self, PhaseArgs::Connect { host: &host, addr }).await
    }

    /// `SMFIC_HELO`.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails.
    pub async fn helo(&mut self, name: &str, macros: &Macros) -> Result<Action> {
        self.store_info_from_macros(macros);
        set_once(&mut self.heloname, Some(name));
        tracing::info!(id = %self.id_str(), phase = "helo", helo = name, "helo");

        self.handler.timings.track("helo", TimingKind::Overhead);
        run_phase(self, PhaseArgs::Helo { name }).await
    }

    /// `SMFIC_MAIL`.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails.
    pub async fn mail_from(&mut self, raw: &str, macros: &Macros) -> Result<Action> {
        if self.id.is_none() {
            self.reset_connection();
        }
        self.store_info_from_macros(macros);

        let sender = clean_address(raw);
        let verdict = self.check_address(&sender, "sender").await;
        if !verdict.is_continue() {
            tracing::info!(id = %self.id_str(), phase = "mailfrom", action = %verdict, "address check decision");
            return Ok(verdict);
        }
        self.sender = Some(sender.clone());

        self.handler.timings.track("mailfrom", TimingKind::Overhead);
        run_phase(self, PhaseArgs::MailFrom { sender: &sender }).await
    }

    /// `SMFIC_RCPT`.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails.
    pub async fn rcpt(&mut self, raw: &str, macros: &Macros) -> Result<Action> {
        self.store_info_from_macros(macros);

        let recipient = clean_address(raw);
        let verdict = self.check_address(&recipient, "recipient").await;
        if !verdict.is_continue() {
            tracing::info!(id = %self.id_str(), phase = "rcpt", action = %verdict, "address check decision");
            return Ok(verdict);
        }
        self.recipients.push(recipient.clone());

        self.handler.timings.track("rcpt", TimingKind::Overhead);
        run_phase(self, PhaseArgs::Rcpt { recipient: &recipient }).await
    }

    /// Applies the address policy; returns the wire action to use.
    async fn check_address(&mut self, address: &str, kind: &str) -> Action {
        let ctx = Arc::clone(self.context());
        if address.is_empty() || ctx.address_policy.is_valid(address) {
            return Action::Continue;
        }

        tracing::warn!(id = %self.id_str(), address, "invalid {kind} address");
        let config = &ctx.config;
        let message = if config.address_compliance_fail_message.is_empty() {
            format!("Invalid {kind} address: {address}")
        } else {
            config.address_compliance_fail_message.clone()
        };
        let reply = PhaseReply::with_message(config.fail_decision().to_action(), message);
        let id = self.id_str().to_string();
        translate(self.transport.as_mut(), reply, &id).await.wire
    }

    /// `SMFIC_DATA`.
    pub fn data(&mut self, macros: &Macros) -> Action {
        self.store_info_from_macros(macros);
        Action::Continue
    }

    /// `SMFIC_HEADER`.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails.
    pub async fn header(&mut self, name: &str, value: &str, macros: &Macros) -> Result<Action> {
        self.store_info_from_macros(macros);
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.extend_from_slice(b": ");
        self.buffer.extend_from_slice(value.as_bytes());
        self.buffer.extend_from_slice(b"\n");
        self.original_headers
            .push((name.to_string(), value.to_string()));

        run_phase(self, PhaseArgs::Header { name, value }).await
    }

    /// `SMFIC_EOH`.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails.
    pub async fn eoh(&mut self, macros: &Macros) -> Result<Action> {
        self.store_info_from_macros(macros);
        self.buffer.extend_from_slice(b"\n");

        self.handler.timings.track("eoh", TimingKind::Overhead);
        run_phase(self, PhaseArgs::Eoh).await
    }

    /// `SMFIC_BODY`. The MTA expects no reply.
    pub fn body(&mut self, chunk: &[u8]) -> Action {
        self.buffer.extend_from_slice(chunk);
        Action::Continue
    }

    /// `SMFIC_BODYEOB`: runs the phase plugins, then the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if a phase plugin fails, the worker pool fails or
    /// a reply cannot be sent.
    pub async fn eob(&mut self, macros: &Macros) -> Result<Action> {
        self.store_info_from_macros(macros);
        self.message_count += 1;

        self.handler.timings.track("eob", TimingKind::Overhead);
        let action = match run_phase(self, PhaseArgs::Eob).await {
            Ok(action) => action,
            Err(e) => {
                self.finish_message();
                return Err(e);
            }
        };
        if !action.is_continue() {
            self.finish_message();
            return Ok(action);
        }

        let result = if self.context().registry.has_pipeline() {
            self.run_pipeline().await
        } else {
            Ok(Action::Continue)
        };

        self.finish_message();
        result
    }

    async fn run_pipeline(&mut self) -> Result<Action> {
        let mut suspect = self.build_suspect();
        tracing::debug!(id = %suspect.id, message = self.message_count, "running plugins on full message");
        self.handler.timings.track("suspect created", TimingKind::Overhead);

        let (decision, message, appenders) = self.handler.scan(&mut suspect).await?;

        let mut deferred = false;
        let action = match decision {
            Decision::Accept | Decision::Dunno => match commit(self, &suspect).await {
                Ok(()) => {
                    self.handler.timings.track("commit", TimingKind::Overhead);
                    Action::Continue
                }
                Err(e) => {
                    tracing::error!(id = %suspect.id, error = %e, "could not commit message");
                    deferred = true;
                    reply::defer(self.transport.as_mut(), None).await
                }
            },
            Decision::Delete => {
                tracing::info!(id = %suspect.id, "message deleted");
                self.transport.send_action(Action::Discard).await?;
                Action::Deferred
            }
            Decision::Reject => {
                let text = tag_message(
                    message.as_deref().unwrap_or(DEFAULT_REJECT_MESSAGE),
                    &suspect.id,
                );
                send_reply_message(self.transport.as_mut(), 550, "", &text).await?;
                Action::Deferred
            }
            Decision::Defer => {
                deferred = true;
                reply::defer(self.transport.as_mut(), message.as_deref()).await
            }
        };

        if deferred {
            tracing::warn!(id = %suspect.id, "message deferred");
        } else {
            self.handler.append(&mut suspect, decision, appenders).await?;
        }

        Ok(action)
    }

    fn build_suspect(&mut self) -> Suspect {
        let id = self.id.clone().unwrap_or_else(generate_id);
        let inbuffer: Bytes = self.buffer.split().freeze();
        let mut suspect = Suspect::new(
            id,
            self.sender.clone().unwrap_or_default(),
            self.recipients.clone(),
            inbuffer,
        );

        let ctx = Arc::clone(self.context());
        suspect.tempdir = ctx.config.tempdir.clone().into();
        suspect.sasl_login.clone_from(&self.sasl_login);
        suspect.sasl_sender.clone_from(&self.sasl_sender);
        suspect.sasl_method.clone_from(&self.sasl_method);
        suspect.queue_id.clone_from(&self.queueid);
        suspect.client_info = ClientInfo {
            helo: self.heloname.clone(),
            addr: self.addr.clone(),
            fcrdns: self.fcrdns.clone(),
        };
        for (name, value) in self.addheaders.iter() {
            suspect.addheaders.set(name, value);
        }
        suspect
            .tags
            .extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        suspect.set_tag(TAG_INCOMING_PORT, ctx.port);
        suspect
    }

    fn finish_message(&mut self) {
        self.buffer.clear();
        if let Some(id) = &self.id {
            self.handler.timings.report(id, true);
        }
        self.handler.timings.reset();
        self.id = None;
    }

    /// `SMFIC_ABORT`: forgets the current message.
    pub fn abort(&mut self) {
        tracing::debug!(id = %self.id_str(), "abort");
        self.reset_connection();
    }

    /// Drops the buffer and closes the transport. Errors are logged.
    pub async fn close(&mut self) {
        self.buffer = BytesMut::new();
        if let Err(e) = self.transport.close().await {
            tracing::warn!(id = %self.id_str(), error = %e, "error while closing connection");
        }
    }

    /// Routes one decoded command to its phase handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase fails.
    pub async fn dispatch(&mut self, event: Event) -> Result<Action> {
        match event {
            Event::Connect {
                hostname,
                family,
                addr,
                port,
                macros,
            } => self.connect(&hostname, family, &addr, port, &macros).await,
            Event::Helo { name, macros } => self.helo(&name, &macros).await,
            Event::MailFrom { sender, macros } => self.mail_from(&sender, &macros).await,
            Event::Rcpt { recipient, macros } => self.rcpt(&recipient, &macros).await,
            Event::Data { macros } => Ok(self.data(&macros)),
            Event::Header {
                name,
                value,
                macros,
            } => self.header(&name, &value, &macros).await,
            Event::EndOfHeaders { macros } => self.eoh(&macros).await,
            Event::Body { chunk } => Ok(self.body(&chunk)),
            Event::EndOfBody { macros } => self.eob(&macros).await,
            Event::Abort => {
                self.abort();
                Ok(Action::Continue)
            }
            Event::Quit => Ok(Action::Continue),
        }
    }

    /// Reads, decodes and answers commands until the connection ends.
    ///
    /// Returns `true` when the MTA closed the connection or sent `QUIT`,
    /// `false` if processing failed and the transport was closed.
    pub async fn handle_session<R>(&mut self, decoder: &mut dyn FrameDecoder, mut reader: R) -> bool
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut input = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            let started = Instant::now();
            let read = reader.read_buf(&mut input).await;
            self.handler
                .timings
                .add_async("reader", started.elapsed().as_secs_f64());
            match read {
                Ok(0) => {
                    tracing::debug!(id = %self.id_str(), "connection closed by MTA");
                    return true;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(id = %self.id_str(), error = %e, "receive error");
                    return true;
                }
            }

            let events = match decoder.decode(&mut input) {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(id = %self.id_str(), error = %e, "undecodable frame");
                    self.close().await;
                    return false;
                }
            };

            for event in events {
                let quit = matches!(event, Event::Quit);
                let expects_reply = event.expects_reply();
                let phase = event.phase();
                match self.dispatch(event).await {
                    Ok(action) => {
                        if expects_reply
                            && action.needs_transmit()
                            && let Err(e) = self.transport.send_action(action).await
                        {
                            tracing::error!(id = %self.id_str(), phase, error = %e, "could not send reply");
                            self.close().await;
                            return false;
                        }
                    }
                    Err(e) => {
                        tracing::error!(id = %self.id_str(), phase, error = %e, "error in session");
                        self.close().await;
                        return false;
                    }
                }
                if quit {
                    return true;
                }
            }

            if input.capacity() - input.len() < CHUNK_SIZE / 4 {
                input.reserve(CHUNK_SIZE);
            }
        }
    }
}
