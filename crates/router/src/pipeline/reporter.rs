//! Spec §4.13: after `next` returns, records the routing-response status
//! and (when an endpoint was actually dispatched to) the request's
//! end-to-end latency; also tags inbound requests with an empty
//! `Content-Length` value.

use async_trait::async_trait;
use http::header::CONTENT_LENGTH;

use super::{Middleware, Next, PipelineContext};
use crate::metrics::{EmptyLabels, ResponseLabels, RouterErrorTag};

pub struct Reporter;

#[async_trait]
impl Middleware for Reporter {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let content_length_empty = ctx
			.req
			.headers()
			.get(CONTENT_LENGTH)
			.and_then(|v| v.to_str().ok())
			.map(|v| v.trim().is_empty())
			.unwrap_or(false);
		if content_length_empty {
			ctx.metrics.empty_content_length.get_or_create(&EmptyLabels {}).inc();
		}

		next.run(ctx).await;

		if ctx.info.route_endpoint.is_some() {
			let router_error = match ctx.router_error {
				Some(tag) => RouterErrorTag::Tag(tag.to_string()),
				None => RouterErrorTag::None,
			};
			ctx
				.metrics
				.routing_responses
				.get_or_create(&ResponseLabels {
					status: ctx.writer.status_code().as_u16() as u32,
					router_error,
				})
				.inc();

			if let Some(duration) = ctx.info.app_request_duration() {
				ctx.metrics.routing_response_latency_seconds.observe(duration.as_secs_f64());
			}
		}
	}
}
