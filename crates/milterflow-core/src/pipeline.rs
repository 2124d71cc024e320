//! Plugin pipeline runner.
//!
//! Phase plugins run through [`run_phase`] with first-decisive-reply-wins
//! semantics. Message plugins run through a [`Handler`], optionally on the
//! blocking worker pool.

use std::sync::Arc;
use std::time::Instant;

use milterflow_milter::Action;

use crate::decision::Decision;
use crate::error::{Error, Result};
use crate::plugin::{self, AppenderList, PhaseArgs, PluginList};
use crate::reply::translate;
use crate::server::ServerContext;
use crate::session::Session;
use crate::suspect::Suspect;
use crate::timings::{TimingKind, Timings};
use crate::trash::trash;

/// Tag holding the total scan time of a message.
pub const TAG_SCANTIME: &str = "milterflow.scantime";

/// Runs the phase plugins registered for `args`.
///
/// Plugins named in the session's skip list are left out. The first reply
/// that is not `CONTINUE` ends the phase.
///
/// # Errors
///
/// Returns [`Error::Plugin`] if a plugin fails.
pub async fn run_phase(sess: &mut Session, args: PhaseArgs<'_>) -> Result<Action> {
    let ctx = Arc::clone(sess.context());
    let phase = args.phase();

    for plugin in ctx.registry.milter_plugins(phase) {
        let name = plugin.name();
        if sess.skip_plugin(name) {
            tracing::debug!(id = %sess.id_str(), plugin = name, %phase, "skipping plugin");
            continue;
        }

        tracing::debug!(id = %sess.id_str(), plugin = name, %phase, "running plugin");
        let reply = plugin::examine(plugin.as_ref(), sess, args)
            .await
            .map_err(|e| {
                tracing::error!(id = %sess.id_str(), plugin = name, %phase, error = %e, "plugin failed");
                Error::plugin(name, &e)
            })?;
        sess.handler.timings.track(name, TimingKind::MilterPlugin);

        let id = sess.id_str().to_string();
        let translated = translate(sess.transport_mut(), reply, &id).await;
        if !translated.wire.is_continue() {
            tracing::info!(
                %id,
                plugin = name,
                %phase,
                action = %translated.action,
                message = %translated.message,
                "plugin decision"
            );
            return Ok(translated.wire);
        }
    }

    Ok(Action::Continue)
}

/// Per-session companion running the message plugins.
#[derive(Debug)]
pub struct Handler {
    ctx: Arc<ServerContext>,
    /// Timing tracker of the current message.
    pub timings: Timings,
    /// Decision of the last full pipeline run.
    pub action: Decision,
    /// Reply text of the last full pipeline run.
    pub message: Option<String>,
}

impl Handler {
    /// Creates a handler for one connection.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let timings = Timings::new(ctx.config.track_timings, ctx.port);
        Self {
            ctx,
            timings,
            action: Decision::Dunno,
            message: None,
        }
    }

    /// Shared server context.
    #[must_use]
    pub const fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Lets the prependers pick the scanners and appenders for `suspect`.
    ///
    /// The registry lists are never touched; a prepender returns a new
    /// list or `None`.
    pub fn run_prependers(&mut self, suspect: &mut Suspect) -> (PluginList, AppenderList) {
        let ctx = Arc::clone(&self.ctx);
        let mut plugins: PluginList = ctx.registry.plugins().to_vec();
        let mut appenders: AppenderList = ctx.registry.appenders().to_vec();

        for prepender in ctx.registry.prependers() {
            let name = prepender.name();
            match prepender.plugin_list(suspect, &plugins) {
                Ok(Some(list)) => plugins = list,
                Ok(None) => {}
                Err(e) => prepender_failed(suspect, name, &e),
            }
            match prepender.appender_list(suspect, &appenders) {
                Ok(Some(list)) => appenders = list,
                Ok(None) => {}
                Err(e) => prepender_failed(suspect, name, &e),
            }
            self.timings.track(name, TimingKind::Prepender);
        }

        (plugins, appenders)
    }

    /// Runs the scanners in order until one returns a final decision.
    ///
    /// A failing scanner is logged and recorded on the suspect, the next
    /// one still runs. `DELETE` trashes the message.
    pub fn run_suspect_plugins(
        &mut self,
        suspect: &mut Suspect,
        plugins: &[Arc<dyn plugin::ScannerPlugin>],
    ) -> (Decision, Option<String>) {
        let started = Instant::now();
        let mut decision = Decision::Dunno;
        let mut message = None;

        for plugin in plugins {
            let name = plugin.name();
            tracing::debug!(id = %suspect.id, plugin = name, "running scanner");
            let plugin_started = Instant::now();
            let result = plugin.examine(suspect);
            suspect
                .scantimes
                .push((name.to_string(), plugin_started.elapsed().as_secs_f64()));
            self.timings.track(name, TimingKind::Plugin);

            let reply = match result {
                Ok(reply) => reply,
                Err(e) => {
                    let err = Error::plugin(name, &e);
                    tracing::error!(id = %suspect.id, plugin = name, error = %err, "scanner failed");
                    suspect.record_error(err.to_string());
                    continue;
                }
            };

            suspect.decisions.push((name.to_string(), reply.decision));
            match reply.decision {
                Decision::Dunno => continue,
                Decision::Accept => {
                    tracing::info!(id = %suspect.id, plugin = name, "plugin accepts message");
                }
                Decision::Delete => {
                    tracing::info!(id = %suspect.id, plugin = name, "plugin deletes message");
                    trash(&self.ctx.config, suspect, name);
                }
                Decision::Reject => {
                    tracing::info!(id = %suspect.id, plugin = name, "plugin rejects message");
                }
                Decision::Defer => {
                    tracing::info!(id = %suspect.id, plugin = name, "plugin defers message");
                }
            }
            decision = reply.decision;
            message = reply.message;
            break;
        }

        self.add_scan_headers(suspect, started.elapsed().as_secs_f64());
        tracing::info!(id = %suspect.id, "{suspect}");

        self.action = decision;
        self.message.clone_from(&message);
        (decision, message)
    }

    fn add_scan_headers(&self, suspect: &mut Suspect, scantime: f64) {
        let config = &self.ctx.config;
        let prefix = &config.prependaddedheaders;

        if config.spamstatusheader {
            let status = if suspect.is_spam() { "YES" } else { "NO" };
            suspect.addheaders.set(format!("{prefix}Spamstatus"), status);
        }

        suspect.set_tag(TAG_SCANTIME, format!("{scantime:.4}"));

        if config.debuginfoheader {
            let info = suspect.to_string();
            suspect.addheaders.set(format!("{prefix}Debuginfo"), info);
        }

        if config.suspectidheader {
            let id = suspect.id.clone();
            suspect.addheaders.set(format!("{prefix}Suspect"), id);
        }
    }

    /// Runs every appender, unless the suspect carries `noappenders`.
    pub fn run_appenders(
        &mut self,
        suspect: &mut Suspect,
        decision: Decision,
        appenders: &[Arc<dyn plugin::Appender>],
    ) {
        if suspect.noappenders() {
            tracing::debug!(id = %suspect.id, "appenders disabled by tag");
            return;
        }

        for appender in appenders {
            let name = appender.name();
            tracing::debug!(id = %suspect.id, appender = name, "running appender");
            if let Err(e) = appender.process(suspect, decision) {
                tracing::error!(id = %suspect.id, appender = name, error = %format!("{e:#}"), "appender failed");
                suspect.record_error(format!("Appender {name} failed: {e:#}"));
            }
            self.timings.track(name, TimingKind::Appender);
        }
    }

    /// Runs prependers and scanners, on the worker pool if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the worker could not run the job.
    pub async fn scan(&mut self, suspect: &mut Suspect) -> Result<(Decision, Option<String>, AppenderList)> {
        self.offload(suspect, |handler, suspect| {
            let (plugins, appenders) = handler.run_prependers(suspect);
            let (decision, message) = handler.run_suspect_plugins(suspect, &plugins);
            (decision, message, appenders)
        })
        .await
    }

    /// Runs the appenders, on the worker pool if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the worker could not run the job.
    pub async fn append(
        &mut self,
        suspect: &mut Suspect,
        decision: Decision,
        appenders: AppenderList,
    ) -> Result<()> {
        self.offload(suspect, move |handler, suspect| {
            handler.run_appenders(suspect, decision, &appenders);
        })
        .await
    }

    /// Runs `job` inline, or on a blocking worker once a pool slot is free.
    async fn offload<T, F>(&mut self, suspect: &mut Suspect, job: F) -> Result<T>
    where
        F: FnOnce(&mut Self, &mut Suspect) -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some(pool) = self.ctx.pool().cloned() else {
            return Ok(job(self, suspect));
        };

        let _permit = pool
            .acquire_owned()
            .await
            .map_err(|e| Error::Worker(e.to_string()))?;

        let fresh = Self::new(Arc::clone(&self.ctx));
        let mut worker = std::mem::replace(self, fresh);
        let mut owned = std::mem::take(suspect);
        let (worker, owned, out) = tokio::task::spawn_blocking(move || {
            let out = job(&mut worker, &mut owned);
            (worker, owned, out)
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?;

        *self = worker;
        *suspect = owned;
        Ok(out)
    }
}

fn prepender_failed(suspect: &mut Suspect, name: &str, err: &anyhow::Error) {
    tracing::error!(id = %suspect.id, prepender = name, error = %format!("{err:#}"), "prepender failed");
    suspect.record_error(format!("Prepender {name} failed: {err:#}"));
}
