//! Listening socket and shared per-server state.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use milterflow_milter::{AddressPolicy, CodecFactory};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::{Config, Modes};
use crate::error::Result;
use crate::plugin::PluginRegistry;
use crate::session::Session;

/// State shared by every session of one listener.
#[derive(Debug)]
pub struct ServerContext {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Registered plugins.
    pub registry: PluginRegistry,
    /// Port the listener is bound to, reported in timings and tags.
    pub port: u16,
    /// Milter modes parsed from the configuration.
    pub modes: Modes,
    /// Envelope address policy parsed from the configuration.
    pub address_policy: AddressPolicy,
    pool: Option<Arc<Semaphore>>,
}

impl ServerContext {
    /// Creates the context. A worker pool is set up when
    /// `worker_threads` is non-zero.
    #[must_use]
    pub fn new(config: Config, registry: PluginRegistry) -> Self {
        let pool = (config.worker_threads > 0)
            .then(|| Arc::new(Semaphore::new(config.worker_threads)));
        Self {
            port: config.port,
            modes: config.modes(),
            address_policy: config.address_policy(),
            config: Arc::new(config),
            registry,
            pool,
        }
    }

    /// Worker pool limiting concurrent message scans.
    #[must_use]
    pub const fn pool(&self) -> Option<&Arc<Semaphore>> {
        self.pool.as_ref()
    }
}

/// Accepts MTA connections and runs one [`Session`] per connection.
pub struct MilterServer {
    ctx: Arc<ServerContext>,
    codec: Arc<dyn CodecFactory>,
    listener: TcpListener,
}

impl std::fmt::Debug for MilterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilterServer")
            .field("listener", &self.listener.local_addr().ok())
            .field("registry", &self.ctx.registry)
            .finish_non_exhaustive()
    }
}

impl MilterServer {
    /// Binds to `bind_address:port` from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(ctx: Arc<ServerContext>, codec: Arc<dyn CodecFactory>) -> Result<Self> {
        let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(
            %addr,
            modes = ?ctx.modes.enabled(),
            actions = ?ctx.modes.filter_options(),
            "milter listening"
        );
        Ok(Self {
            ctx,
            codec,
            listener,
        })
    }

    /// Address actually bound, useful with port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections forever.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serves connections until `shutdown` completes. Running sessions
    /// are left to finish on their own.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("milter shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(%peer, "connection accepted");
                    self.spawn_session(stream);
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        let (mut decoder, transport) = self.codec.open(Box::new(writer));
        let mut session = Session::new(Arc::clone(&self.ctx), transport);

        tokio::spawn(async move {
            let clean = session.handle_session(decoder.as_mut(), reader).await;
            if clean {
                session.close().await;
            }
            tracing::debug!(id = %session.id_str(), clean, "session ended");
        });
    }
}
