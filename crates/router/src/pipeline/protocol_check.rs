//! Spec §4.4: accepts HTTP/1.0 and HTTP/1.1 unconditionally, HTTP/2 only
//! when explicitly enabled. Rejections prefer a hijacked raw write (engines
//! that can't hijack cleanly degrade to a normal 400, per spec §9).

use async_trait::async_trait;
use http::{StatusCode, Version};
use tokio::io::AsyncWriteExt;

use super::{Middleware, Next, PipelineContext};

pub struct ProtocolCheck;

#[async_trait]
impl Middleware for ProtocolCheck {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let version = ctx.req.version();
		let accepted = matches!(version, Version::HTTP_10 | Version::HTTP_11)
			|| (version == Version::HTTP_2 && ctx.config.enable_http2);
		if accepted {
			return next.run(ctx).await;
		}

		match ctx.writer.hijack() {
			Ok(mut io) => {
				let _ = io.stream.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n").await;
				let _ = io.stream.shutdown().await;
				ctx.writer.write_status(StatusCode::BAD_REQUEST);
				ctx.writer.mark_done();
			},
			Err(_) => {
				ctx.writer.write_status(StatusCode::BAD_REQUEST);
				ctx.writer.write("");
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use http::Request;

	use super::*;
	use crate::pipeline::test_support::test_ctx;

	#[tokio::test]
	async fn accepts_http11() {
		let mut ctx = test_ctx(
			Request::builder()
				.version(Version::HTTP_11)
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ProtocolCheck)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
	}

	#[tokio::test]
	async fn rejects_http2_when_disabled_without_hijack_support() {
		let mut ctx = test_ctx(
			Request::builder()
				.version(Version::HTTP_2)
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ProtocolCheck)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn accepts_http2_when_enabled() {
		let mut ctx = test_ctx(
			Request::builder()
				.version(Version::HTTP_2)
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.enable_http2 = true;
			c
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ProtocolCheck)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
	}
}
