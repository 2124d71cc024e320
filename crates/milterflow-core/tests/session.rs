//! Integration tests for the milter session.
//!
//! Sessions are driven either phase by phase or through a line based
//! decoder, with a recording transport standing in for the MTA.

#![allow(clippy::unwrap_used, clippy::similar_names, clippy::too_many_lines)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use bytes::{Bytes, BytesMut};

use milterflow_core::config::TRASH_LOG_NAME;
use milterflow_core::reply::DEFAULT_DEFER_MESSAGE;
use milterflow_core::suspect::TAG_MILTER_REPLACE;
use milterflow_core::{
    Appender, Config, Decision, Phase, PhaseArgs, PhaseReply, PluginRegistry, ScanReply,
    ScannerPlugin, ServerContext, Session, Suspect, SyncAdapter, SyncMilterPlugin,
};
use milterflow_milter::{
    Action, CollectingTransport, Event, Family, FrameDecoder, Macros, Modification, Negotiated,
    ReplyCode, Transmitted,
};

/// Phase plugin answering every phase with the same reply.
struct Fixed {
    name: &'static str,
    reply: PhaseReply,
    calls: Arc<AtomicUsize>,
}

impl Fixed {
    fn new(name: &'static str, reply: PhaseReply) -> (SyncAdapter<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let plugin = Self {
            name,
            reply,
            calls: Arc::clone(&calls),
        };
        (SyncAdapter(plugin), calls)
    }
}

impl SyncMilterPlugin for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    fn examine(&self, _sess: &mut Session, _args: PhaseArgs<'_>) -> anyhow::Result<PhaseReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct Exploding;

impl SyncMilterPlugin for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn examine(&self, _sess: &mut Session, _args: PhaseArgs<'_>) -> anyhow::Result<PhaseReply> {
        bail!("lookup table missing")
    }
}

/// Scanner with a canned reply and an optional change to the suspect.
struct Scanner {
    name: &'static str,
    reply: Option<ScanReply>,
    change: fn(&mut Suspect),
    calls: Arc<AtomicUsize>,
}

impl Scanner {
    fn new(name: &'static str, reply: Option<ScanReply>) -> Self {
        Self {
            name,
            reply,
            change: |_| {},
            calls: Arc::default(),
        }
    }

    fn changing(mut self, change: fn(&mut Suspect)) -> Self {
        self.change = change;
        self
    }
}

impl ScannerPlugin for Scanner {
    fn name(&self) -> &str {
        self.name
    }

    fn examine(&self, suspect: &mut Suspect) -> anyhow::Result<ScanReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.change)(suspect);
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => bail!("engine unavailable"),
        }
    }
}

type Seen = Arc<Mutex<Vec<(Decision, Vec<String>)>>>;

/// Appender remembering the decision and processing errors it saw.
struct Recorder(Seen);

impl Appender for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn process(&self, suspect: &mut Suspect, decision: Decision) -> anyhow::Result<()> {
        let errors = suspect
            .processing_errors()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.0.lock().unwrap().push((decision, errors));
        Ok(())
    }
}

fn session(config: Config, registry: PluginRegistry) -> (Session, CollectingTransport) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let transport = CollectingTransport::new(Negotiated::all());
    let ctx = Arc::new(ServerContext::new(config, registry));
    (Session::new(ctx, Box::new(transport.clone())), transport)
}

async fn envelope(sess: &mut Session) {
    let none = Macros::new();
    let action = sess
        .connect("mx.example.net", Family::Inet4, "192.0.2.1", 4242, &none)
        .await
        .unwrap();
    assert_eq!(action, Action::Continue);
    assert_eq!(sess.helo("mx.example.net", &none).await.unwrap(), Action::Continue);
    assert_eq!(sess.mail_from("<a@example.com>", &none).await.unwrap(), Action::Continue);
    assert_eq!(sess.rcpt("<b@example.org>", &none).await.unwrap(), Action::Continue);
}

async fn message(sess: &mut Session) -> Action {
    let none = Macros::new();
    assert_eq!(sess.data(&none), Action::Continue);
    sess.header("Subject", "hello", &none).await.unwrap();
    sess.eoh(&none).await.unwrap();
    sess.body(b"body text\n");
    sess.eob(&none).await.unwrap()
}

fn last_reply(transport: &CollectingTransport) -> milterflow_milter::Reply {
    match transport.sent().last() {
        Some(Transmitted::Reply(reply)) => reply.clone(),
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[tokio::test]
async fn first_decisive_phase_plugin_wins() {
    let (a, a_calls) = Fixed::new("a", PhaseReply::cont());
    let (b, b_calls) = Fixed::new("b", PhaseReply::with_message(Action::Reject, "go away"));
    let (c, c_calls) = Fixed::new("c", PhaseReply::cont());
    let registry = PluginRegistry::new()
        .with_milter_plugin(&[Phase::Helo], a)
        .with_milter_plugin(&[Phase::Helo], b)
        .with_milter_plugin(&[Phase::Helo], c);
    let (mut sess, transport) = session(Config::default(), registry);
    let id = sess.id().unwrap().to_string();

    let action = sess.helo("mx.example.net", &Macros::new()).await.unwrap();

    assert_eq!(action, Action::Deferred);
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    let reply = last_reply(&transport);
    assert_eq!(reply.code, ReplyCode::REJECT);
    assert_eq!(reply.xcode, "5.7.1");
    assert_eq!(reply.message, format!("go away ({id})"));
}

#[tokio::test]
async fn accept_from_phase_plugin_passes_through() {
    let (a, _) = Fixed::new("a", Action::Accept.into());
    let registry = PluginRegistry::new().with_milter_plugin(&[Phase::Connect], a);
    let (mut sess, transport) = session(Config::default(), registry);

    let action = sess
        .connect("mx.example.net", Family::Inet6, "2001:db8::1", 25, &Macros::new())
        .await
        .unwrap();

    assert_eq!(action, Action::Accept);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn skipped_plugins_do_not_run() {
    let (blocker, calls) = Fixed::new("blocker", Action::Reject.into());
    let registry = PluginRegistry::new().with_milter_plugin(&[Phase::Helo], blocker);
    let (mut sess, _) = session(Config::default(), registry);

    sess.add_plugin_skip("other");
    sess.add_plugin_skip("blocker");
    let action = sess.helo("mx.example.net", &Macros::new()).await.unwrap();

    assert_eq!(action, Action::Continue);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sess.tags()["skipmplugins"], "other,blocker");
    assert!(sess.skip_plugin("BLOCKER"));
    assert!(!sess.skip_plugin("block"));
}

#[tokio::test]
async fn unsupported_family_tempfails() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    let action = sess
        .connect("localhost", Family::Unix, "/run/mta.sock", 0, &Macros::new())
        .await
        .unwrap();
    assert_eq!(action, Action::TempFail);
    assert_eq!(sess.addr(), None);
}

#[tokio::test]
async fn unresolved_client_is_unknown() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    let macros: Macros = [("_", "mail.example.net [192.0.2.1]")].into_iter().collect();
    sess.connect("[192.0.2.1]", Family::Inet4, "192.0.2.1", 4242, &macros)
        .await
        .unwrap();

    assert_eq!(sess.fcrdns(), Some("unknown"));
    assert_eq!(sess.ptr(), Some("mail.example.net"));
    assert_eq!(sess.addr(), Some("192.0.2.1"));
}

#[tokio::test]
async fn connection_details_are_write_once() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    let login: Macros = [("auth_authen", "alice"), ("auth_type", "PLAIN")]
        .into_iter()
        .collect();
    let other: Macros = [("auth_authen", "mallory"), ("i", "4XyZ1")].into_iter().collect();

    sess.helo("first.example.net", &login).await.unwrap();
    sess.helo("second.example.net", &other).await.unwrap();

    assert_eq!(sess.heloname(), Some("first.example.net"));
    assert_eq!(sess.sasl_login(), Some("alice"));
    assert_eq!(sess.sasl_method(), Some("PLAIN"));
    assert_eq!(sess.queueid(), Some("4XyZ1"));
}

#[tokio::test]
async fn reset_keeps_connection_and_clears_message() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    let none = Macros::new();
    let login: Macros = [("auth_authen", "alice"), ("_", "ptr.example.net [192.0.2.1]")]
        .into_iter()
        .collect();
    let tls: Macros = [("cipher", "TLS_AES_256_GCM_SHA384"), ("tls_version", "TLSv1.3")]
        .into_iter()
        .collect();
    sess.connect("mx.example.net", Family::Inet4, "192.0.2.1", 4242, &none)
        .await
        .unwrap();
    sess.helo("mx.example.net", &tls).await.unwrap();
    sess.mail_from("<a@example.com>", &login).await.unwrap();
    sess.rcpt("<b@example.org>", &none).await.unwrap();
    sess.data(&[("i", "Q1")].into_iter().collect());
    sess.header("Subject", "hello", &none).await.unwrap();
    sess.eoh(&none).await.unwrap();
    sess.body(b"body text\n");
    sess.add_header("X-Queued", "1");
    sess.add_plugin_skip("blocker");
    sess.tags_mut().insert("verdict".to_string(), "spam".into());
    let first = sess.id().unwrap().to_string();

    assert_eq!(sess.queueid(), Some("Q1"));
    assert!(!sess.buffer().is_empty());
    assert!(!sess.original_headers().is_empty());
    assert!(!sess.queued_headers().is_empty());
    assert!(sess.skip_plugin("blocker"));
    assert_eq!(sess.tags().len(), 2);

    sess.reset_connection();
    let second = sess.id().unwrap().to_string();
    sess.reset_connection();
    let third = sess.id().unwrap().to_string();

    assert_ne!(first, second);
    assert_ne!(second, third);
    assert_eq!(sess.addr(), Some("192.0.2.1"));
    assert_eq!(sess.fcrdns(), Some("mx.example.net"));
    assert_eq!(sess.ptr(), Some("ptr.example.net"));
    assert_eq!(sess.heloname(), Some("mx.example.net"));
    assert_eq!(sess.sasl_login(), Some("alice"));
    assert_eq!(sess.cipher(), Some("TLS_AES_256_GCM_SHA384"));
    assert_eq!(sess.tls_version(), Some("TLSv1.3"));
    assert_eq!(sess.queueid(), None);
    assert_eq!(sess.from_address(), None);
    assert!(sess.recipients().is_empty());
    assert!(sess.original_headers().is_empty());
    assert!(sess.buffer().is_empty());
    assert!(sess.queued_headers().is_empty());
    assert!(!sess.skip_plugin("blocker"));
    assert!(sess.tags().is_empty());
}

#[tokio::test]
async fn header_macros_are_stored() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    envelope(&mut sess).await;
    let late: Macros = [("i", "4XyZ9"), ("auth_type", "LOGIN")].into_iter().collect();

    sess.header("Subject", "hello", &late).await.unwrap();

    assert_eq!(sess.queueid(), Some("4XyZ9"));
    assert_eq!(sess.sasl_method(), Some("LOGIN"));
}

#[tokio::test]
async fn failing_eob_plugin_still_finishes_the_message() {
    let registry =
        PluginRegistry::new().with_milter_plugin(&[Phase::Eob], SyncAdapter(Exploding));
    let (mut sess, _) = session(Config::default(), registry);
    envelope(&mut sess).await;
    let none = Macros::new();
    sess.data(&none);
    sess.header("Subject", "hello", &none).await.unwrap();
    sess.eoh(&none).await.unwrap();
    sess.body(b"body text\n");

    assert!(sess.eob(&none).await.is_err());
    assert_eq!(sess.id(), None);
    assert!(sess.buffer().is_empty());
}

#[tokio::test]
async fn template_values_describe_the_message() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    envelope(&mut sess).await;
    sess.rcpt("<Last@Example.NET>", &Macros::new()).await.unwrap();
    sess.header("Subject", "hi", &Macros::new()).await.unwrap();

    let values = sess.template_values();
    assert_eq!(values["from_address"], "a@example.com");
    assert_eq!(values["from_domain"], "example.com");
    assert_eq!(values["to_address"], "Last@Example.NET");
    assert_eq!(values["to_domain"], "example.net");
    assert_eq!(values["addr"], "192.0.2.1");
    assert_eq!(values["size"], "12");
    assert!(!values.contains_key("queueid"));
}

#[tokio::test]
async fn invalid_recipient_is_rejected_when_configured() {
    let config = Config {
        address_compliance_fail_action: "reject".to_string(),
        ..Config::default()
    };
    let (mut sess, transport) = session(config, PluginRegistry::new());
    envelope(&mut sess).await;
    let id = sess.id().unwrap().to_string();

    let action = sess.rcpt("<not an address>", &Macros::new()).await.unwrap();

    assert_eq!(action, Action::Deferred);
    assert_eq!(sess.recipients(), ["b@example.org"]);
    let reply = last_reply(&transport);
    assert_eq!(reply.code, ReplyCode::REJECT);
    assert_eq!(reply.message, format!("Invalid recipient address: not an address ({id})"));
}

#[tokio::test]
async fn invalid_address_passes_with_dunno() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let action = sess.mail_from("<broken@@>", &Macros::new()).await.unwrap();
    assert_eq!(action, Action::Continue);
    assert_eq!(sess.from_address(), Some("broken@@"));

    let action = sess.mail_from("<>", &Macros::new()).await.unwrap();
    assert_eq!(action, Action::Continue);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn invalid_sender_uses_configured_message() {
    let config = Config {
        address_compliance_fail_action: "defer".to_string(),
        address_compliance_fail_message: "fix your sender".to_string(),
        ..Config::default()
    };
    let (mut sess, transport) = session(config, PluginRegistry::new());
    let id = sess.id().unwrap().to_string();

    let action = sess.mail_from("<a b@example.com>", &Macros::new()).await.unwrap();

    assert_eq!(action, Action::Deferred);
    assert_eq!(sess.from_address(), None);
    let reply = last_reply(&transport);
    assert_eq!(reply.code, ReplyCode::TEMPFAIL);
    assert_eq!(reply.message, format!("fix your sender ({id})"));
}

#[tokio::test]
async fn without_pipeline_end_of_body_continues() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert_eq!(sess.id(), None);
    assert!(sess.buffer().is_empty());
    assert_eq!(sess.message_count(), 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn next_message_gets_a_new_id() {
    let (mut sess, _) = session(Config::default(), PluginRegistry::new());
    envelope(&mut sess).await;
    let first = sess.id().unwrap().to_string();
    message(&mut sess).await;

    sess.mail_from("<c@example.com>", &Macros::new()).await.unwrap();
    let second = sess.id().unwrap().to_string();
    assert_ne!(first, second);
    assert!(sess.recipients().is_empty());
}

#[tokio::test]
async fn end_of_body_plugin_skips_the_pipeline() {
    let (eob, _) = Fixed::new("eob", PhaseReply::with_message(Action::TempFail, "slow down"));
    let scanner = Scanner::new("never", Some(Decision::Accept.into()));
    let scans = Arc::clone(&scanner.calls);
    let registry = PluginRegistry::new()
        .with_milter_plugin(&[Phase::Eob], eob)
        .with_plugin(scanner);
    let (mut sess, transport) = session(Config::default(), registry);
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Deferred);
    assert_eq!(scans.load(Ordering::SeqCst), 0);
    assert_eq!(last_reply(&transport).code, ReplyCode::TEMPFAIL);
    assert_eq!(sess.id(), None);
}

#[tokio::test]
async fn reject_uses_default_text() {
    let seen = Seen::default();
    let registry = PluginRegistry::new()
        .with_plugin(Scanner::new("spam", Some(Decision::Reject.into())))
        .with_appender(Recorder(Arc::clone(&seen)));
    let (mut sess, transport) = session(Config::default(), registry);
    envelope(&mut sess).await;
    let id = sess.id().unwrap().to_string();

    assert_eq!(message(&mut sess).await, Action::Deferred);

    let reply = last_reply(&transport);
    assert_eq!(reply.code, ReplyCode::REJECT);
    assert_eq!(reply.xcode, "5.7.1");
    assert_eq!(reply.message, format!("Rejected by content scanner ({id})"));
    assert_eq!(seen.lock().unwrap()[0].0, Decision::Reject);
}

#[tokio::test]
async fn delete_discards_and_trashes() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        trashdir: tmp.path().display().to_string(),
        trashlog: true,
        ..Config::default()
    };
    let registry =
        PluginRegistry::new().with_plugin(Scanner::new("virus", Some(Decision::Delete.into())));
    let (mut sess, transport) = session(config, registry);
    envelope(&mut sess).await;
    let id = sess.id().unwrap().to_string();

    assert_eq!(message(&mut sess).await, Action::Deferred);
    assert_eq!(transport.sent(), vec![Transmitted::Action(Action::Discard)]);

    let mut names: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert_eq!(names[0], TRASH_LOG_NAME);
    assert!(names[1].starts_with(&id));

    let trashed_path = tmp.path().join(&names[1]);
    let trashed = std::fs::read(&trashed_path).unwrap();
    assert_eq!(trashed, b"Subject: hello\n\nbody text\n");
    let log = std::fs::read_to_string(tmp.path().join(TRASH_LOG_NAME)).unwrap();
    let expected = format!("a@example.com b@example.org virus {}", trashed_path.display());
    assert!(log.trim_end().ends_with(&expected), "{log}");
}

#[tokio::test]
async fn defer_sends_tempfail_and_skips_appenders() {
    let seen = Seen::default();
    let registry = PluginRegistry::new()
        .with_plugin(Scanner::new("greylist", Some(ScanReply::with_message(Decision::Defer, "try later"))))
        .with_appender(Recorder(Arc::clone(&seen)));
    let (mut sess, transport) = session(Config::default(), registry);
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Deferred);

    let reply = last_reply(&transport);
    assert_eq!(reply.code, ReplyCode::TEMPFAIL);
    assert_eq!(reply.xcode, "4.7.1");
    assert_eq!(reply.message, "try later");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_scanner_does_not_stop_the_message() {
    let seen = Seen::default();
    let next = Scanner::new("next", Some(Decision::Dunno.into()));
    let next_calls = Arc::clone(&next.calls);
    let registry = PluginRegistry::new()
        .with_plugin(Scanner::new("broken", None))
        .with_plugin(next)
        .with_appender(Recorder(Arc::clone(&seen)));
    let (mut sess, transport) = session(Config::default(), registry);
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert_eq!(next_calls.load(Ordering::SeqCst), 1);
    assert!(transport.modifications().is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, Decision::Dunno);
    assert_eq!(seen[0].1, vec!["Plugin broken failed: engine unavailable"]);
}

#[tokio::test]
async fn auto_mode_without_changes_sends_nothing() {
    let config = Config {
        milter_mode: "auto".to_string(),
        ..Config::default()
    };
    let registry =
        PluginRegistry::new().with_plugin(Scanner::new("clean", Some(Decision::Accept.into())));
    let (mut sess, transport) = session(config, registry);
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn auto_mode_applies_header_changes() {
    let config = Config {
        milter_mode: "auto".to_string(),
        ..Config::default()
    };
    let scanner = Scanner::new("tagger", Some(Decision::Dunno.into())).changing(|s| {
        s.add_header("X-Scanned", "yes", true).unwrap();
    });
    let (mut sess, transport) = session(config, PluginRegistry::new().with_plugin(scanner));
    envelope(&mut sess).await;
    sess.add_header("X-Session", "queued");

    assert_eq!(message(&mut sess).await, Action::Continue);

    let mods = transport.modifications();
    assert!(mods.contains(&Modification::AddHeader {
        name: "X-Scanned".to_string(),
        value: "yes".to_string(),
    }));
    assert!(mods.contains(&Modification::AddHeader {
        name: "X-Session".to_string(),
        value: "queued".to_string(),
    }));
    assert!(matches!(mods.last(), Some(Modification::ReplaceBody { .. })));
}

#[tokio::test]
async fn manual_to_option_rewrites_recipients() {
    let config = Config {
        milter_mode: "manual".to_string(),
        milter_mode_options: "to".to_string(),
        ..Config::default()
    };
    let scanner = Scanner::new("alias", Some(Decision::Dunno.into()))
        .changing(|s| s.recipients = vec!["c@example.org".to_string()]);
    let (mut sess, transport) = session(config, PluginRegistry::new().with_plugin(scanner));
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert_eq!(
        transport.modifications(),
        vec![
            Modification::DelRcpt {
                rcpt: "b@example.org".to_string()
            },
            Modification::AddRcpt {
                rcpt: "c@example.org".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn tags_mode_follows_replace_tag() {
    let scanner = Scanner::new("rewriter", Some(Decision::Dunno.into())).changing(|s| {
        s.from_address = "bounce@example.com".to_string();
        s.set_tag(TAG_MILTER_REPLACE, "from");
    });
    let (mut sess, transport) =
        session(Config::default(), PluginRegistry::new().with_plugin(scanner));
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert_eq!(
        transport.modifications(),
        vec![Modification::ChangeFrom {
            from: "bounce@example.com".to_string(),
            params: None,
        }]
    );
}

#[tokio::test]
async fn readonly_mode_never_modifies() {
    let config = Config {
        milter_mode: "readonly".to_string(),
        ..Config::default()
    };
    let scanner = Scanner::new("rewriter", Some(Decision::Dunno.into())).changing(|s| {
        s.set_tag(TAG_MILTER_REPLACE, "all");
        s.addheaders.set("X-Never", "sent");
    });
    let (mut sess, transport) = session(config, PluginRegistry::new().with_plugin(scanner));
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn failed_commit_defers() {
    let seen = Seen::default();
    let config = Config {
        milter_mode: "manual".to_string(),
        milter_mode_options: "from".to_string(),
        ..Config::default()
    };
    let registry = PluginRegistry::new()
        .with_plugin(Scanner::new("ok", Some(Decision::Accept.into())))
        .with_appender(Recorder(Arc::clone(&seen)));
    let (mut sess, transport) = session(config, registry);
    envelope(&mut sess).await;
    transport.fail_modifications(true);

    assert_eq!(message(&mut sess).await, Action::Deferred);

    let reply = last_reply(&transport);
    assert_eq!(reply.code, ReplyCode::TEMPFAIL);
    assert_eq!(reply.message, DEFAULT_DEFER_MESSAGE);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pipeline_on_worker_pool() {
    let seen = Seen::default();
    let config = Config {
        worker_threads: 1,
        ..Config::default()
    };
    let registry = PluginRegistry::new()
        .with_plugin(Scanner::new("ok", Some(Decision::Accept.into())))
        .with_appender(Recorder(Arc::clone(&seen)));
    let (mut sess, _) = session(config, registry);
    envelope(&mut sess).await;

    assert_eq!(message(&mut sess).await, Action::Continue);
    assert_eq!(seen.lock().unwrap()[0].0, Decision::Accept);
    assert_eq!(sess.handler().action, Decision::Accept);
}

/// Decodes one command per line: `<command> [argument]`.
struct LineDecoder;

impl FrameDecoder for LineDecoder {
    fn decode(&mut self, buf: &mut BytesMut) -> milterflow_milter::Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let frame = buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&frame[..pos]).into_owned();
            let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let macros = Macros::new();
            events.push(match command {
                "connect" => Event::Connect {
                    hostname: arg.to_string(),
                    family: Family::Inet4,
                    addr: "192.0.2.1".to_string(),
                    port: 4242,
                    macros,
                },
                "helo" => Event::Helo {
                    name: arg.to_string(),
                    macros,
                },
                "mail" => Event::MailFrom {
                    sender: arg.to_string(),
                    macros,
                },
                "rcpt" => Event::Rcpt {
                    recipient: arg.to_string(),
                    macros,
                },
                "data" => Event::Data { macros },
                "header" => {
                    let (name, value) = arg.split_once(": ").unwrap_or((arg, ""));
                    Event::Header {
                        name: name.to_string(),
                        value: value.to_string(),
                        macros,
                    }
                }
                "eoh" => Event::EndOfHeaders { macros },
                "body" => Event::Body {
                    chunk: Bytes::from(format!("{arg}\n")),
                },
                "eob" => Event::EndOfBody { macros },
                "abort" => Event::Abort,
                "quit" => Event::Quit,
                other => {
                    return Err(milterflow_milter::Error::Protocol(format!(
                        "unknown command {other}"
                    )));
                }
            });
        }
        Ok(events)
    }
}

const DIALOGUE: &[u8] = b"connect mx.example.net\nhelo mx.example.net\nmail <a@example.com>\n\
rcpt <b@example.org>\ndata\nheader Subject: hi\neoh\nbody hello\neob\n";

#[tokio::test]
async fn handle_session_answers_until_eof() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());

    let clean = sess.handle_session(&mut LineDecoder, DIALOGUE).await;

    assert!(clean);
    let continues = transport
        .sent()
        .iter()
        .filter(|t| **t == Transmitted::Action(Action::Continue))
        .count();
    assert_eq!(continues, 8);
    assert_eq!(transport.sent().len(), 8);
    assert_eq!(sess.message_count(), 1);
}

#[tokio::test]
async fn handle_session_stops_at_quit() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let input: &[u8] = b"helo mx.example.net\nquit\nhelo ignored.example.net\n";

    assert!(sess.handle_session(&mut LineDecoder, input).await);
    assert_eq!(transport.sent(), vec![Transmitted::Action(Action::Continue)]);
    assert_eq!(sess.heloname(), Some("mx.example.net"));
}

#[tokio::test]
async fn abort_forgets_the_message() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let input: &[u8] = b"mail <a@example.com>\nrcpt <b@example.org>\nabort\n";

    assert!(sess.handle_session(&mut LineDecoder, input).await);
    assert_eq!(transport.sent().len(), 2);
    assert!(sess.recipients().is_empty());
    assert_eq!(sess.from_address(), None);
}

#[tokio::test]
async fn phase_plugin_error_closes_the_session() {
    let registry =
        PluginRegistry::new().with_milter_plugin(&[Phase::Helo], SyncAdapter(Exploding));
    let (mut sess, transport) = session(Config::default(), registry);

    let clean = sess.handle_session(&mut LineDecoder, DIALOGUE).await;

    assert!(!clean);
    assert_eq!(
        transport.sent(),
        vec![Transmitted::Action(Action::Continue), Transmitted::Closed]
    );
}

#[tokio::test]
async fn undecodable_input_closes_the_session() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let input: &[u8] = b"helo mx.example.net\nbogus\n";

    assert!(!sess.handle_session(&mut LineDecoder, input).await);
    assert_eq!(transport.sent(), vec![Transmitted::Closed]);
}

#[tokio::test]
async fn failed_reply_closes_the_session() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    transport.fail_all(true);

    assert!(!sess.handle_session(&mut LineDecoder, DIALOGUE).await);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn scripted_stream_over_duplex() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let (mut mta, filter) = tokio::io::duplex(64);

    let script = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        for line in DIALOGUE.split_inclusive(|b| *b == b'\n') {
            mta.write_all(line).await.unwrap();
        }
        mta.write_all(b"quit\n").await.unwrap();
    });

    assert!(sess.handle_session(&mut LineDecoder, filter).await);
    script.await.unwrap();
    assert_eq!(transport.sent().len(), 8);
    assert_eq!(sess.id(), None);
}

#[tokio::test]
async fn frames_split_across_reads() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let reader = tokio_test::io::Builder::new()
        .read(b"helo mx.exa")
        .read(b"mple.net\nmail <a@exa")
        .read(b"mple.com>\nquit\n")
        .build();

    assert!(sess.handle_session(&mut LineDecoder, reader).await);
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(sess.heloname(), Some("mx.example.net"));
    assert_eq!(sess.from_address(), Some("a@example.com"));
}

#[tokio::test]
async fn receive_error_ends_quietly() {
    let (mut sess, transport) = session(Config::default(), PluginRegistry::new());
    let reader = tokio_test::io::Builder::new()
        .read(b"helo mx.example.net\n")
        .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        .build();

    assert!(sess.handle_session(&mut LineDecoder, reader).await);
    assert_eq!(transport.sent(), vec![Transmitted::Action(Action::Continue)]);
}
