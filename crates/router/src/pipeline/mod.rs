//! The middleware framework (spec §4.1): a strict, ordered chain over a
//! shared, single-owner [`PipelineContext`]. Each stage may mutate the
//! request, wrap the response writer, short-circuit by writing a response
//! and not calling `next`, or observe state after `next` returns.
//!
//! Unlike a generic `tower`-style `Service`, the chain's order is fixed by
//! spec §2 and never reconfigured at runtime, so stages are plain structs
//! implementing [`Middleware`] and composed once at startup by
//! [`build_chain`].

pub mod access_log;
pub mod backend_dispatch;
pub mod client_cert;
pub mod forwarded_headers;
pub mod healthcheck;
pub mod hop_by_hop;
pub mod http_rewrite;
pub mod lookup;
pub mod max_request_size;
pub mod panic_guard;
pub mod protocol_check;
pub mod query_param_lint;
pub mod reporter;
pub mod route_service;
pub mod start_stop;
pub mod trace_context;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum_core::body::Body;
use http::{HeaderName, HeaderValue, Request};

use crate::access_log::{AccessLogger, RequestByteCounter};
use crate::config::RouterConfig;
use crate::crypto::RouteServiceCrypto;
use crate::errors::PipelineError;
use crate::health::Health;
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::request_info::RequestInfo;
use crate::response_writer::ProxyResponseWriter;
use crate::trace::TraceInfo;
use crate::transport::Transport;

pub const X_CF_ROUTER_ERROR: HeaderName = HeaderName::from_static("x-cf-routererror");

/// Digest of the connection's TLS state, captured once at accept time.
/// Stands in for a live `rustls::ServerConnection` handle — dial/accept
/// machinery is out of scope (spec §1); the pipeline only ever needs to
/// know whether the peer presented a certificate and, if so, its DER bytes.
#[derive(Debug, Clone, Default)]
pub struct TlsConnectionInfo {
	pub peer_certificate_der: Option<Vec<u8>>,
}

/// One downstream middleware invocation. Wraps the remaining slice of the
/// chain so each stage can call `next.run(ctx)` without knowing how many
/// stages follow it.
pub struct Next<'a> {
	remaining: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
	pub fn new(remaining: &'a [Arc<dyn Middleware>]) -> Self {
		Next { remaining }
	}

	/// Runs the next stage in the chain, or does nothing if the chain is
	/// exhausted (the framework always terminates the configured chain with
	/// `BackendDispatch`, so reaching the end here indicates a
	/// misconfigured chain rather than a normal outcome).
	pub async fn run(self, ctx: &mut PipelineContext) {
		if let Some((mw, rest)) = self.remaining.split_first() {
			mw.handle(ctx, Next::new(rest)).await;
		}
	}
}

#[async_trait]
pub trait Middleware: Send + Sync {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>);
}

/// Everything a stage needs: the mutable request, the wrapped writer, the
/// per-request `RequestInfo`, and read-only handles to the process-wide
/// collaborators (registry, transport, config, health, metrics, access
/// logger). Owned by exactly one task — see spec §5.
pub struct PipelineContext {
	pub req: Request<Body>,
	pub remote_addr: SocketAddr,
	pub tls: Option<TlsConnectionInfo>,

	pub info: RequestInfo,
	pub writer: ProxyResponseWriter,

	/// Set when a stage has already produced a terminal response; later
	/// stages and the framework consult this instead of re-deriving it from
	/// the writer so short-circuits are unambiguous even before `finish()`.
	pub router_error: Option<&'static str>,

	/// Route-service signature validation (§4.12 step 4) already succeeded
	/// for this request, so the ClientCertSanitizer (§4.8) must skip
	/// mutation (`skipSanitization`).
	pub route_service_return_validated: bool,
	/// Set when `forceDeleteHeader` (§4.8) should supersede the configured
	/// mode and delete `X-Forwarded-Client-Cert` unconditionally.
	pub force_delete_client_cert_header: bool,

	pub request_bytes: RequestByteCounter,

	pub config: Arc<RouterConfig>,
	pub registry: Arc<dyn Registry>,
	pub transport: Arc<dyn Transport>,
	pub route_service_crypto: Arc<RouteServiceCrypto>,
	pub health: Health,
	pub metrics: Arc<Metrics>,
	pub access_logger: Arc<dyn AccessLogger>,
}

impl PipelineContext {
	/// Stamps the response with a failure's status/tag/body and records the
	/// tag for downstream observers (Reporter, AccessLog). Stages that need
	/// additional response headers (e.g. `Cache-Control`) must set them
	/// before calling this.
	pub fn fail(&mut self, err: PipelineError) {
		let (status, tag) = err.status();
		if let Some(tag) = tag {
			if let Ok(v) = HeaderValue::from_str(tag) {
				self.writer.headers_mut().insert(X_CF_ROUTER_ERROR, v);
			}
		}
		self.writer.write_status(status);
		self.writer.write(err.body());
		self.router_error = tag;
	}

	pub fn host_header(&self) -> Option<&str> {
		self.req.headers().get(http::header::HOST).and_then(|v| v.to_str().ok())
	}
}

/// Builds the fixed 18-stage chain in spec §2's order. `BackendDispatch`
/// (item 18) is always last.
pub fn build_chain() -> Vec<Arc<dyn Middleware>> {
	vec![
		Arc::new(panic_guard::PanicGuard),
		Arc::new(protocol_check::ProtocolCheck),
		Arc::new(healthcheck::HealthcheckShortCircuit),
		Arc::new(access_log::AccessLogStart),
		Arc::new(trace_context::TraceContext),
		Arc::new(start_stop::StartStopEmitter),
		Arc::new(max_request_size::MaxRequestSize),
		Arc::new(hop_by_hop::HopByHop),
		Arc::new(query_param_lint::QueryParamLint),
		Arc::new(forwarded_headers::XForwardedProtoFor),
		Arc::new(client_cert::ClientCertSanitizer),
		Arc::new(http_rewrite::HttpRewrite),
		Arc::new(lookup::Lookup),
		Arc::new(route_service::RouteService),
		Arc::new(reporter::Reporter),
		Arc::new(backend_dispatch::BackendDispatch),
	]
}

/// Runs a request through the full chain and produces the final response.
/// Mirrors spec §2 items 1-2: `RequestInfo` and the `ProxyResponseWriter`
/// wrapper are allocated by the caller (the connection driver) before the
/// chain runs, since both are needed to report on requests that fail before
/// reaching any chain stage (e.g. a malformed request line).
pub async fn run(
	chain: &[Arc<dyn Middleware>],
	mut ctx: PipelineContext,
) -> http::Response<crate::response_writer::ResponseBody> {
	Next::new(chain).run(&mut ctx).await;
	ctx.info.mark_finished();
	let (response, _meta) = ctx.writer.finish();
	response
}
