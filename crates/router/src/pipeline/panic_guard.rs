//! Spec §4.3: recovers any panic raised downstream. The well-known
//! "abort-handler" sentinel (a peer going away mid-response) is re-raised so
//! the connection driver can let the transport handle it; any other panic
//! is logged and turned into a 502.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use super::{Middleware, Next, PipelineContext, X_CF_ROUTER_ERROR};

/// A downstream stage panics with this payload type to signal "the peer
/// went away, let the transport observe the broken pipe" rather than an
/// unexpected bug. No stage in this workspace raises it under normal
/// operation; it exists so the contract in spec §4.3 is expressible and
/// testable.
pub struct ClientAbortSentinel;

pub fn abort_with_client_disconnect() -> ! {
	std::panic::panic_any(ClientAbortSentinel)
}

pub struct PanicGuard;

#[async_trait]
impl Middleware for PanicGuard {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let outcome = AssertUnwindSafe(next.run(ctx)).catch_unwind().await;
		let Err(payload) = outcome else {
			return;
		};
		if payload.downcast_ref::<ClientAbortSentinel>().is_some() {
			std::panic::resume_unwind(payload);
		}

		let host = ctx.host_header().unwrap_or("").to_string();
		error!(host, "recovered panic in request pipeline");
		ctx.writer.headers_mut().insert(X_CF_ROUTER_ERROR, "unknown_failure".parse().unwrap());
		ctx.writer.write_status(StatusCode::BAD_GATEWAY);
		ctx.writer.write("");
		ctx.router_error = Some("unknown_failure");
		ctx.health.mark_degraded();
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;
	use crate::pipeline::test_support::{get, test_ctx};

	struct Panics;
	#[async_trait]
	impl Middleware for Panics {
		async fn handle(&self, _ctx: &mut PipelineContext, _next: Next<'_>) {
			panic!("boom");
		}
	}

	struct AbortsClient;
	#[async_trait]
	impl Middleware for AbortsClient {
		async fn handle(&self, _ctx: &mut PipelineContext, _next: Next<'_>) {
			abort_with_client_disconnect();
		}
	}

	#[tokio::test]
	async fn recovers_ordinary_panics_as_502() {
		let chain: Vec<std::sync::Arc<dyn Middleware>> =
			vec![std::sync::Arc::new(PanicGuard), std::sync::Arc::new(Panics)];
		let mut ctx = test_ctx(get("http://example.com/"));
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::BAD_GATEWAY);
		assert_eq!(ctx.router_error, Some("unknown_failure"));
		assert_eq!(ctx.health.state(), crate::health::HealthState::Degraded);
	}

	#[tokio::test]
	#[should_panic]
	async fn reraises_client_abort_sentinel() {
		let chain: Vec<std::sync::Arc<dyn Middleware>> =
			vec![std::sync::Arc::new(PanicGuard), std::sync::Arc::new(AbortsClient)];
		let mut ctx = test_ctx(get("http://example.com/"));
		Next::new(&chain).run(&mut ctx).await;
	}
}
