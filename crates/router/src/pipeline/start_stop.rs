//! Spec §2 item 8: emits the "request start/stop" telemetry envelope —
//! one `requests_started` increment on entry, one `requests_stopped` once
//! the rest of the chain has returned.

use async_trait::async_trait;

use super::{Middleware, Next, PipelineContext};
use crate::metrics::EmptyLabels;

pub struct StartStopEmitter;

#[async_trait]
impl Middleware for StartStopEmitter {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		ctx.metrics.requests_started.get_or_create(&EmptyLabels {}).inc();

		next.run(ctx).await;

		ctx.metrics.requests_stopped.get_or_create(&EmptyLabels {}).inc();
	}
}
