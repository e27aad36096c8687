//! Spec §4.7: strips operator-allowlisted hop-by-hop header names from the
//! inbound `Connection` header's token list, leaving everything else
//! (unlike a strict RFC 7230 hop-by-hop implementation, which would strip
//! the whole set unconditionally).

use async_trait::async_trait;
use http::HeaderValue;
use http::header::CONNECTION;

use super::{Middleware, Next, PipelineContext};

pub struct HopByHop;

#[async_trait]
impl Middleware for HopByHop {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		if ctx.config.hop_by_hop_filter_allowlist.is_empty() {
			return next.run(ctx).await;
		}

		if let Some(value) = ctx.req.headers().get(CONNECTION).and_then(|v| v.to_str().ok()).map(str::to_string) {
			let remaining: Vec<&str> = value
				.split(',')
				.map(str::trim)
				.filter(|t| !t.is_empty())
				.filter(|t| !ctx.config.hop_by_hop_filter_allowlist.iter().any(|n| n.eq_ignore_ascii_case(t)))
				.collect();

			if remaining.is_empty() {
				ctx.req.headers_mut().remove(CONNECTION);
			} else if let Ok(v) = HeaderValue::from_str(&remaining.join(", ")) {
				ctx.req.headers_mut().insert(CONNECTION, v);
			}
		}

		next.run(ctx).await;
	}
}
