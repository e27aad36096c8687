//! Spec §4.6: rejects with 431 once the reconstructed request head would
//! exceed the configured byte budget, estimated without ever serializing
//! the head for real.

use async_trait::async_trait;
use axum_core::body::Body;
use http::{Request, Version, header::HOST};

use super::{Middleware, Next, PipelineContext};
use crate::errors::PipelineError;
use crate::registry::{EndpointIterator, RouteKey};

fn version_str(v: Version) -> &'static str {
	match v {
		Version::HTTP_09 => "HTTP/0.9",
		Version::HTTP_10 => "HTTP/1.0",
		Version::HTTP_2 => "HTTP/2.0",
		Version::HTTP_3 => "HTTP/3.0",
		_ => "HTTP/1.1",
	}
}

/// `len(method) + len(request-URI) + len(proto) + 4` (request line, CRLF,
/// two spaces) `+ len(Host) + 8` (Host header framing) `+ Σ over each
/// header (key, value) pair of (len(key) + len(value) + 4)`.
fn estimate_head_size(req: &Request<Body>) -> usize {
	let request_line = req.method().as_str().len() + req.uri().to_string().len() + version_str(req.version()).len() + 4;

	let host_len = req
		.headers()
		.get(HOST)
		.and_then(|v| v.to_str().ok())
		.map(|s| s.len())
		.unwrap_or(0);

	let headers: usize = req
		.headers()
		.iter()
		.map(|(name, value)| name.as_str().len() + value.len() + 4)
		.sum();

	request_line + host_len + 8 + headers
}

pub struct MaxRequestSize;

#[async_trait]
impl Middleware for MaxRequestSize {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let estimated = estimate_head_size(&ctx.req);
		if estimated < ctx.config.max_request_header_bytes {
			return next.run(ctx).await;
		}

		if let Some(host) = ctx.host_header().map(|h| h.to_string()) {
			let key = RouteKey::new(&host, ctx.req.uri().path());
			if let Some(pool) = ctx.registry.lookup(&key) {
				let mut it = EndpointIterator::new(
					pool.endpoints().cloned(),
					ctx.config.load_balance_policy,
					pool.max_conns_per_backend(),
					&[],
					ctx.config.local_zone.as_deref(),
				);
				ctx.info.route_endpoint = it.next();
			}
		}

		ctx.fail(PipelineError::MaxRequestSizeExceeded);
		ctx.writer.mark_done();
	}
}
