//! Spec §2 item 11: flags the deprecated `;`-as-separator convention in the
//! raw query string with a log line and a `Warning` response header,
//! without ever rejecting the request.

use async_trait::async_trait;
use http::HeaderName;
use http::HeaderValue;

use super::{Middleware, Next, PipelineContext};

const WARNING: HeaderName = HeaderName::from_static("warning");

pub struct QueryParamLint;

#[async_trait]
impl Middleware for QueryParamLint {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		if ctx.config.lint_semicolon_in_query {
			if let Some(query) = ctx.req.uri().query() {
				if query.contains(';') {
					tracing::warn!(uri = %ctx.req.uri(), "deprecated ';' separator in query string");
					ctx.writer.headers_mut().insert(
						WARNING,
						HeaderValue::from_static("199 - \"deprecated query parameter separator ';'\""),
					);
				}
			}
		}

		next.run(ctx).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::pipeline::test_support::{get, test_ctx};

	#[tokio::test]
	async fn tags_response_when_semicolon_present_in_query() {
		let mut ctx = test_ctx(get("http://example.com/foo?a=1;b=2"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(QueryParamLint)];
		Next::new(&chain).run(&mut ctx).await;
		assert!(ctx.writer.headers().get(WARNING).is_some());
	}

	#[tokio::test]
	async fn leaves_ordinary_queries_untagged() {
		let mut ctx = test_ctx(get("http://example.com/foo?a=1&b=2"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(QueryParamLint)];
		Next::new(&chain).run(&mut ctx).await;
		assert!(ctx.writer.headers().get(WARNING).is_none());
	}

	#[tokio::test]
	async fn respects_config_flag() {
		let mut ctx = test_ctx(get("http://example.com/foo?a=1;b=2"));
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.lint_semicolon_in_query = false;
			c
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(QueryParamLint)];
		Next::new(&chain).run(&mut ctx).await;
		assert!(ctx.writer.headers().get(WARNING).is_none());
	}
}
