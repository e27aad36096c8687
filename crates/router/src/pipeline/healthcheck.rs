//! Spec §2 item 5: intercepts load-balancer health probes by User-Agent and
//! answers directly from the process-wide `Health` object, without
//! continuing into routing.

use async_trait::async_trait;
use http::StatusCode;
use http::header::USER_AGENT;

use super::{Middleware, Next, PipelineContext};
use crate::health::HealthState;

pub struct HealthcheckShortCircuit;

#[async_trait]
impl Middleware for HealthcheckShortCircuit {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let is_probe = ctx
			.req
			.headers()
			.get(USER_AGENT)
			.and_then(|v| v.to_str().ok())
			.map(|ua| ua == ctx.config.healthcheck_user_agent)
			.unwrap_or(false);
		if !is_probe {
			return next.run(ctx).await;
		}

		match ctx.health.state() {
			HealthState::Healthy => {
				ctx.writer.write_status(StatusCode::OK);
				ctx.writer.write("ok");
			},
			HealthState::Degraded => {
				ctx.writer.write_status(StatusCode::SERVICE_UNAVAILABLE);
				ctx.writer.write("unhealthy");
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use http::Request;
	use http::header::USER_AGENT;

	use super::*;
	use crate::pipeline::test_support::test_ctx;

	fn probe_ctx() -> PipelineContext {
		test_ctx(
			Request::builder()
				.uri("http://example.com/")
				.header(USER_AGENT, "HTTP-Monitor/1.1")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		)
	}

	#[tokio::test]
	async fn healthy_probe_returns_200() {
		let mut ctx = probe_ctx();
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(HealthcheckShortCircuit)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
	}

	#[tokio::test]
	async fn degraded_probe_returns_503() {
		let mut ctx = probe_ctx();
		ctx.health.mark_degraded();
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(HealthcheckShortCircuit)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::SERVICE_UNAVAILABLE);
	}

	#[tokio::test]
	async fn non_probe_requests_continue() {
		let mut ctx = test_ctx(
			Request::builder()
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(HealthcheckShortCircuit)];
		Next::new(&chain).run(&mut ctx).await;
		// Falls through to the end of this (single-stage) chain, so no
		// status was ever set explicitly.
		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
		assert!(!ctx.writer.is_done());
	}
}
