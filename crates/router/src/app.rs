//! Process assembly: wires the pipeline's collaborators into a runnable
//! binary. Grounded on the teacher's `app.rs::run`/`Bound` split (drain
//! channel, readiness tasks, admin server, `wait_termination`), simplified
//! to a single tokio runtime — this workspace has no control-plane
//! competing for worker threads, so the teacher's dedicated data-plane OS
//! thread (`new_data_plane_pool`) has no remaining reason to exist here
//! (see DESIGN.md).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum_core::body::Body;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use router_core::drain::{self, DrainWatcher};
use router_core::readiness::Ready;
use router_core::signal::Shutdown;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{info, warn};

use crate::access_log::StdoutLogger;
use crate::admin::AdminService;
use crate::config::RouterConfig;
use crate::crypto::{RouteServiceCrypto, RouteServiceKey};
use crate::health::Health;
use crate::metrics::Metrics;
use crate::pipeline::{self, Middleware, PipelineContext, TlsConnectionInfo};
use crate::registry::InMemoryRegistry;
use crate::request_info::RequestInfo;
use crate::response_writer::ProxyResponseWriter;
use crate::trace::TraceInfo;
use crate::transport::HyperTransport;

/// Everything a client-facing connection needs to build a
/// [`PipelineContext`] per request. Shared behind an `Arc` across every
/// accepted connection and request task.
pub struct AppState {
	pub config: Arc<RouterConfig>,
	pub registry: Arc<InMemoryRegistry>,
	pub transport: Arc<HyperTransport>,
	pub route_service_crypto: Arc<RouteServiceCrypto>,
	pub health: Health,
	pub metrics: Arc<Metrics>,
	pub access_logger: Arc<StdoutLogger>,
	pub chain: Vec<Arc<dyn Middleware>>,
}

fn decode_key(b64: &str) -> anyhow::Result<RouteServiceKey> {
	let bytes = BASE64.decode(b64).context("route service key is not valid base64")?;
	let bytes: [u8; 32] = bytes
		.try_into()
		.map_err(|_| anyhow::anyhow!("route service key must decode to exactly 32 bytes"))?;
	Ok(RouteServiceKey::from_bytes(bytes))
}

impl AppState {
	pub fn new(config: Arc<RouterConfig>, metrics_registry: &mut prometheus_client::registry::Registry) -> anyhow::Result<Self> {
		let active = match &config.route_service_active_key {
			Some(b64) => decode_key(b64)?,
			None => {
				warn!("no route_service_active_key configured; generating an ephemeral one for this process");
				use rand::RngCore;
				let mut bytes = [0u8; 32];
				rand::rng().fill_bytes(&mut bytes);
				RouteServiceKey::from_bytes(bytes)
			},
		};
		let previous = config.route_service_previous_key.as_deref().map(decode_key).transpose()?;

		Ok(AppState {
			registry: Arc::new(InMemoryRegistry::new()),
			transport: Arc::new(HyperTransport::new(config.backend_read_timeout)),
			route_service_crypto: Arc::new(RouteServiceCrypto::new(active, previous, config.route_service_signature_expiry)),
			health: Health::new(),
			metrics: Arc::new(Metrics::new(metrics_registry)),
			access_logger: Arc::new(StdoutLogger),
			chain: pipeline::build_chain(),
			config,
		})
	}

	fn new_context(&self, req: http::Request<Body>, remote_addr: SocketAddr, tls: Option<TlsConnectionInfo>) -> PipelineContext {
		PipelineContext {
			req,
			remote_addr,
			tls,
			info: RequestInfo::new(TraceInfo::generate()),
			writer: ProxyResponseWriter::new(None),
			router_error: None,
			route_service_return_validated: false,
			force_delete_client_cert_header: false,
			request_bytes: Default::default(),
			config: self.config.clone(),
			registry: self.registry.clone(),
			transport: self.transport.clone(),
			route_service_crypto: self.route_service_crypto.clone(),
			health: self.health.clone(),
			metrics: self.metrics.clone(),
			access_logger: self.access_logger.clone(),
		}
	}

	async fn serve_request(
		self: Arc<Self>,
		req: http::Request<Incoming>,
		remote_addr: SocketAddr,
		tls: Option<TlsConnectionInfo>,
	) -> Result<http::Response<crate::response_writer::ResponseBody>, std::convert::Infallible> {
		let req = req.map(Body::new);
		let ctx = self.new_context(req, remote_addr, tls);
		Ok(pipeline::run(&self.chain, ctx).await)
	}
}

/// A bound, not-yet-terminated router process: the client-facing listeners
/// and the admin server are already spawned by the time this is returned.
pub struct Bound {
	pub shutdown: Shutdown,
	/// The live route registry, open for population by whatever process
	/// supplies routes (a control-plane client, or a test harness).
	pub registry: Arc<InMemoryRegistry>,
	/// Actual bound address of each `config.listen_addrs` entry, in order —
	/// useful when the config requested an ephemeral port (`:0`).
	pub listen_addrs: Vec<SocketAddr>,
	drain_tx: drain::DrainTrigger,
}

impl Bound {
	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.shutdown.wait().await;
		self.drain_tx.start_drain_and_wait(drain::DrainMode::Graceful).await;
		Ok(())
	}
}

/// Binds every `config.listen_addrs` entry (plain TCP, or TLS when
/// `config.tls` is set) plus the admin surface, and spawns their accept
/// loops. Mirrors the teacher's `app::run`.
pub async fn run(config: Arc<RouterConfig>) -> anyhow::Result<Bound> {
	let shutdown = Shutdown::new();
	let (drain_tx, drain_rx) = drain::new();
	let ready = Ready::new();
	let admin_task = ready.register_task("admin listener");
	let proxy_task = ready.register_task("proxy listeners");

	let mut metrics_registry = prometheus_client::registry::Registry::default();
	let state = Arc::new(AppState::new(config.clone(), &mut metrics_registry)?);

	let tls_acceptor = config.tls.as_ref().map(crate::tls::acceptor).transpose()?;

	let mut listen_addrs = Vec::with_capacity(config.listen_addrs.len());
	for addr in &config.listen_addrs {
		listen_addrs.push(spawn_listener(*addr, state.clone(), tls_acceptor.clone(), drain_rx.clone()).await?);
	}
	drop(proxy_task);

	let admin = AdminService::bind(config.admin_addr, metrics_registry, ready.clone(), shutdown.trigger(), drain_rx.clone()).await?;
	admin.spawn();
	drop(admin_task);

	Ok(Bound {
		shutdown,
		registry: state.registry.clone(),
		listen_addrs,
		drain_tx,
	})
}

async fn spawn_listener(
	addr: SocketAddr,
	state: Arc<AppState>,
	tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
	drain_rx: DrainWatcher,
) -> anyhow::Result<SocketAddr> {
	let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
	let bound_addr = listener.local_addr().unwrap_or(addr);
	info!(%bound_addr, "client-facing listener established");

	tokio::spawn(async move {
		let stream = TcpListenerStream::new(listener);
		let mut stream = stream.take_until(Box::pin(drain_rx.clone().wait_for_drain()));
		while let Some(Ok(socket)) = stream.next().await {
			let _ = socket.set_nodelay(true);
			let remote_addr = socket.peer_addr().unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
			let state = state.clone();
			let drain_rx = drain_rx.clone();
			let tls_acceptor = tls_acceptor.clone();

			tokio::spawn(async move {
				match tls_acceptor {
					Some(acceptor) => match acceptor.accept(socket).await {
						Ok(tls_stream) => {
							let tls_info = crate::tls::connection_info(&tls_stream);
							serve_connection(TokioIo::new(tls_stream), remote_addr, Some(tls_info), state, drain_rx).await;
						},
						Err(err) => warn!(%remote_addr, error = %err, "TLS handshake failed"),
					},
					None => serve_connection(TokioIo::new(socket), remote_addr, None, state, drain_rx).await,
				}
			});
		}
		info!(%bound_addr, "client-facing listener drained");
	});

	Ok(bound_addr)
}

async fn serve_connection<IO>(
	io: TokioIo<IO>,
	remote_addr: SocketAddr,
	tls: Option<TlsConnectionInfo>,
	state: Arc<AppState>,
	drain_rx: DrainWatcher,
) where
	IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let service = hyper::service::service_fn(move |req| {
		let state = state.clone();
		let tls = tls.clone();
		async move { state.serve_request(req, remote_addr, tls).await }
	});

	let mut builder = auto::Builder::new(TokioExecutor::new());
	builder.http1().timer(hyper_util::rt::TokioTimer::new());
	builder.http2().timer(hyper_util::rt::TokioTimer::new());
	let conn = builder.serve_connection_with_upgrades(io, service);

	match futures_util::future::select(Box::pin(drain_rx.wait_for_drain()), Box::pin(conn)).await {
		futures_util::future::Either::Left((_drained, conn)) => {
			// auto::Builder's connection does not expose a pinned
			// graceful_shutdown the way hyper::server::conn::http1 does;
			// letting the in-flight request finish naturally is the closest
			// equivalent here, so just await it out.
			let _ = conn.await;
		},
		futures_util::future::Either::Right((result, _drain)) => {
			if let Err(err) = result {
				warn!(%remote_addr, error = %err, "connection error");
			}
		},
	}
}
