//! `Server` composition root and accept loop.
//!
//! The server owns the certificate authority, snapshot store, router and
//! topics, and serves plaintext CONNECT bootstrapping and TLS interception
//! on a single port.

use super::demux::{sniff, Protocol};
use super::handler::RequestHandler;
use super::network::{create_listener, resolve_addr};
use super::replay::ReplayTransport;
use super::transport::{Transport, UpstreamTransport};
use super::tunnel::Tunnel;
use crate::admin::AdminApi;
use crate::ca::tls::create_tls_acceptor;
use crate::ca::CertAuthority;
use crate::config::{
    Config, ConnectionPoolConfig, Mode, TunnelConfig, UpstreamConfig, DEFAULT_LISTEN_ADDR,
};
use crate::recorder::{Clock, Recorder, SystemClock};
use crate::router::{DynamicRouter, SnapshotRouter};
use crate::rules::{basic_match_rule, MatchRule};
use crate::snapshot::Snapshot;
use crate::store::{load_snapshots_from_dir, SnapshotStore};
use crate::topic::{Stream, Topic};
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DEFAULT_TOPIC_BUFFER: usize = 64;

pub struct Server {
    addr: String,
    tunnel: TunnelConfig,
    connection_pool: ConnectionPoolConfig,
    upstream: UpstreamConfig,
    ca: Arc<CertAuthority>,
    store: Arc<dyn SnapshotStore>,
    router: Arc<dyn SnapshotRouter>,
    topic: Topic<Snapshot>,
    // The capture writer persists from here before re-publishing on `topic`,
    // so stream consumers never see a snapshot that is not yet on disk.
    write_topic: Topic<Snapshot>,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    accept_loop: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(ca: Arc<CertAuthority>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            addr: DEFAULT_LISTEN_ADDR.to_string(),
            tunnel: TunnelConfig::default(),
            connection_pool: ConnectionPoolConfig::default(),
            upstream: UpstreamConfig::default(),
            ca,
            store,
            router: Arc::new(DynamicRouter::new()),
            topic: Topic::new(DEFAULT_TOPIC_BUFFER),
            write_topic: Topic::new(DEFAULT_TOPIC_BUFFER),
            transport: None,
            clock: Arc::new(SystemClock),
            local_addr: None,
            shutdown: CancellationToken::new(),
            accept_loop: None,
            writer: None,
        }
    }

    pub fn from_config(
        config: &Config,
        ca: Arc<CertAuthority>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let mut server = Self::new(ca, store).with_addr(config.listen.addr.clone());
        server.tunnel = config.tunnel.clone();
        server.connection_pool = config.connection_pool.clone();
        server.upstream = config.upstream.clone();
        server.topic = Topic::new(config.topic.buffer);
        server.write_topic = Topic::new(config.topic.buffer);
        server
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Bind an ephemeral loopback port.
    pub fn with_test_addr(self) -> Self {
        self.with_addr("127.0.0.1:0")
    }

    pub fn with_router(mut self, router: Arc<dyn SnapshotRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn with_topic(mut self, topic: Topic<Snapshot>) -> Self {
        self.topic = topic;
        self
    }

    /// Replace the upstream transport used in capture mode.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tunnel_config(mut self, tunnel: TunnelConfig) -> Self {
        self.tunnel = tunnel;
        self
    }

    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = upstream;
        self
    }

    /// The externally visible snapshot topic.
    pub fn topic(&self) -> Topic<Snapshot> {
        self.topic.clone()
    }

    pub fn router(&self) -> Arc<dyn SnapshotRouter> {
        Arc::clone(&self.router)
    }

    pub fn ca(&self) -> &Arc<CertAuthority> {
        &self.ca
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `http://` URL of the listener, for use as a client's proxy setting.
    pub fn url(&self) -> String {
        format!("http://{}", self.display_addr())
    }

    pub fn secure_url(&self) -> String {
        format!("https://{}", self.display_addr())
    }

    fn display_addr(&self) -> String {
        match self.local_addr {
            Some(addr) => addr.to_string(),
            None => self.addr.clone(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting connections and stop the capture writer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Register every archive under `dir` with a rule matching its exact request.
    pub fn load_snapshots(&self, dir: &Path) -> Result<usize, anyhow::Error> {
        let snapshots = load_snapshots_from_dir(dir)
            .with_context(|| format!("failed to load snapshots from {}", dir.display()))?;

        for snapshot in &snapshots {
            let rule = basic_match_rule(snapshot)
                .with_context(|| format!("snapshot {} has no usable request", snapshot.id))?;
            self.router
                .register(snapshot.reference(), vec![Arc::new(rule) as Arc<dyn MatchRule>]);
        }

        info!("Loaded {} snapshots from {}", snapshots.len(), dir.display());
        Ok(snapshots.len())
    }

    /// Forward to origins and record every exchange.
    pub async fn start_in_capture_mode(&mut self) -> Result<(), anyhow::Error> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(ref transport) => Arc::clone(transport),
            None => Arc::new(UpstreamTransport::from_config(
                &self.connection_pool,
                &self.upstream,
            )?),
        };

        // Subscribe before accepting so no snapshot can miss the writer.
        let write_stream = self.write_topic.subscribe();
        self.start(Mode::Capture, self.write_topic.clone(), transport)
            .await?;

        self.writer = Some(tokio::spawn(run_capture_writer(
            write_stream,
            Arc::clone(&self.store),
            self.topic.clone(),
            self.shutdown.clone(),
        )));
        Ok(())
    }

    /// Answer from stored snapshots without touching the network.
    pub async fn start_in_replay_mode(&mut self) -> Result<(), anyhow::Error> {
        let transport = Arc::new(ReplayTransport::new(
            Arc::clone(&self.router),
            Arc::clone(&self.store),
        ));
        self.start(Mode::Replay, self.topic.clone(), transport).await
    }

    async fn start(
        &mut self,
        mode: Mode,
        record_to: Topic<Snapshot>,
        transport: Arc<dyn Transport>,
    ) -> Result<(), anyhow::Error> {
        if self.accept_loop.is_some() {
            anyhow::bail!("server already started");
        }

        let addr = resolve_addr(&self.addr).await?;
        let listener =
            create_listener(addr).with_context(|| format!("failed to listen on {addr}"))?;
        let local_addr = listener.local_addr()?;
        let acceptor = create_tls_acceptor(&self.ca)?;

        let handler = Arc::new(RequestHandler::new(
            Tunnel::new(
                local_addr,
                Duration::from_millis(self.tunnel.dial_timeout_ms),
            ),
            AdminApi::new(self.topic.clone(), mode),
            Recorder::with_clock(record_to, Arc::clone(&self.clock)),
            transport,
        ));

        self.local_addr = Some(local_addr);
        self.accept_loop = Some(tokio::spawn(accept_loop(
            listener,
            acceptor,
            handler,
            Duration::from_millis(self.tunnel.sniff_timeout_ms),
            self.shutdown.clone(),
        )));

        info!("Mode: {}", mode);
        info!("CONNECT proxy listening on {}", self.url());
        info!("MITM proxy listening on {}", self.secure_url());
        Ok(())
    }

    /// Run until [`Server::shutdown`] is called.
    pub async fn serve(&mut self) -> Result<(), anyhow::Error> {
        let accept_loop = self
            .accept_loop
            .take()
            .context("server must be started before serving")?;
        accept_loop.await.context("accept loop panicked")?;

        if let Some(writer) = self.writer.take() {
            writer.await.context("capture writer panicked")?;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handler: Arc<RequestHandler>,
    sniff_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let handler = Arc::clone(&handler);
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            match sniff(&stream, sniff_timeout).await {
                Ok(Some(Protocol::Http)) => {
                    serve_connection(TokioIo::new(stream), handler, false, remote_addr).await
                }
                Ok(Some(Protocol::Tls)) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        serve_connection(TokioIo::new(tls_stream), handler, true, remote_addr)
                            .await
                    }
                    Err(err) => {
                        debug!("TLS handshake failed from {}: {}", remote_addr, err);
                    }
                },
                Ok(None) => debug!("Connection from {} closed before sending data", remote_addr),
                Err(err) => debug!("Failed to sniff connection from {}: {}", remote_addr, err),
            }
        });
    }
    info!("Listener stopped");
}

async fn serve_connection<I>(
    io: TokioIo<I>,
    handler: Arc<RequestHandler>,
    secure: bool,
    remote_addr: SocketAddr,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let handler = Arc::clone(&handler);
        async move { handler.handle(req, secure).await }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        debug!("Error serving connection from {}: {}", remote_addr, err);
    }
}

/// Persist every captured snapshot, then hand it to the public topic.
async fn run_capture_writer(
    mut stream: Stream<Snapshot>,
    store: Arc<dyn SnapshotStore>,
    topic: Topic<Snapshot>,
    shutdown: CancellationToken,
) {
    info!("Starting capture writer");
    loop {
        let snapshot = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(snapshot) => snapshot,
                None => break,
            },
        };

        if let Err(e) = store.write(&snapshot) {
            error!("Failed to write snapshot {}: {}", snapshot.id, e);
        }

        let id = snapshot.id.clone();
        if let Err(e) = topic.publish_until(snapshot, &shutdown).await {
            error!("Failed to publish snapshot {} after write: {}", id, e);
        }
    }
    stream.unsubscribe();
    debug!("Capture writer stopped");
}
