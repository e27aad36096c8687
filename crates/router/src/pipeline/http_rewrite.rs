//! Spec §4.9: declarative response header policy, registered as
//! [`HeaderRewriter`](crate::response_writer::HeaderRewriter)s on the
//! `ProxyResponseWriter` so they apply exactly once at `finish()` —
//! removals before additions, per the remove-then-add ordering decision
//! recorded for this spec's Open Question on rewriter precedence.

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};

use super::{Middleware, Next, PipelineContext};

pub struct HttpRewrite;

#[async_trait]
impl Middleware for HttpRewrite {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let mut remove_set = ctx.config.response_remove_headers.clone();
		remove_set.extend(ctx.config.framework_always_remove_headers.iter().cloned());
		if !remove_set.is_empty() {
			ctx.writer.add_header_rewriter(move |headers: &mut HeaderMap| {
				for name in &remove_set {
					if let Ok(hn) = HeaderName::try_from(name.as_str()) {
						headers.remove(hn);
					}
				}
			});
		}

		let add_set = ctx.config.response_add_headers_if_not_present.clone();
		if !add_set.is_empty() {
			ctx.writer.add_header_rewriter(move |headers: &mut HeaderMap| {
				for (name, value) in &add_set {
					if let (Ok(hn), Ok(hv)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
						if !headers.contains_key(&hn) {
							headers.insert(hn, hv);
						}
					}
				}
			});
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
	async fn adds_header_only_when_absent() {
		let mut ctx = test_ctx(get("http://example.com/"));
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.response_add_headers_if_not_present = vec![("x-frame-options".to_string(), "DENY".to_string())];
			c
		});
		ctx.writer.headers_mut().insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(HttpRewrite)];
		Next::new(&chain).run(&mut ctx).await;
		let (resp, _) = ctx.writer.finish();
		assert_eq!(resp.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");
	}

	#[tokio::test]
	async fn removes_configured_and_framework_headers() {
		let mut ctx = test_ctx(get("http://example.com/"));
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.response_remove_headers = vec!["x-internal-debug".to_string()];
			c
		});
		ctx
			.writer
			.headers_mut()
			.insert("x-internal-debug", HeaderValue::from_static("1"));
		ctx
			.writer
			.headers_mut()
			.insert("x-cf-forwarded-url", HeaderValue::from_static("http://internal/"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(HttpRewrite)];
		Next::new(&chain).run(&mut ctx).await;
		let (resp, _) = ctx.writer.finish();
		assert!(resp.headers().get("x-internal-debug").is_none());
		assert!(resp.headers().get("x-cf-forwarded-url").is_none());
	}

	#[tokio::test]
	async fn remove_runs_before_add_if_not_present() {
		let mut ctx = test_ctx(get("http://example.com/"));
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.response_remove_headers = vec!["x-cache".to_string()];
			c.response_add_headers_if_not_present = vec![("x-cache".to_string(), "MISS".to_string())];
			c
		});
		ctx.writer.headers_mut().insert("x-cache", HeaderValue::from_static("HIT"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(HttpRewrite)];
		Next::new(&chain).run(&mut ctx).await;
		let (resp, _) = ctx.writer.finish();
		assert_eq!(resp.headers().get("x-cache").unwrap(), "MISS");
	}
}
