//! Spec §2 item 12: normalizes `X-Forwarded-For` (append the peer's
//! address to any existing chain) and forces `X-Forwarded-Proto` to the
//! scheme this connection was actually accepted on, the way the teacher's
//! gateway handler builds its own forwarding headers.

use async_trait::async_trait;
use http::HeaderValue;
use http::header::HeaderName;

use super::{Middleware, Next, PipelineContext};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

pub struct XForwardedProtoFor;

#[async_trait]
impl Middleware for XForwardedProtoFor {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let client_ip = ctx.remote_addr.ip().to_string();
		let headers = ctx.req.headers_mut();

		match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()).map(str::to_string) {
			Some(existing) => {
				let combined = format!("{existing}, {client_ip}");
				if let Ok(v) = HeaderValue::from_str(&combined) {
					headers.insert(X_FORWARDED_FOR, v);
				}
			},
			None => {
				if let Ok(v) = HeaderValue::from_str(&client_ip) {
					headers.insert(X_FORWARDED_FOR, v);
				}
			},
		}

		let proto = if ctx.tls.is_some() { "https" } else { "http" };
		headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

		next.run(ctx).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use http::Request;

	use super::*;
	use crate::pipeline::test_support::test_ctx;

	#[tokio::test]
	async fn sets_forwarded_for_when_absent() {
		let mut ctx = test_ctx(
			Request::builder()
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(XForwardedProtoFor)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_FOR).unwrap(), "10.0.0.1");
	}

	#[tokio::test]
	async fn appends_to_existing_forwarded_for_chain() {
		let req = Request::builder()
			.uri("http://example.com/")
			.header(X_FORWARDED_FOR, "1.2.3.4")
			.body(axum_core::body::Body::empty())
			.unwrap();
		let mut ctx = test_ctx(req);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(XForwardedProtoFor)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_FOR).unwrap(), "1.2.3.4, 10.0.0.1");
	}

	#[tokio::test]
	async fn proto_reflects_plaintext_connection() {
		let mut ctx = test_ctx(
			Request::builder()
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(XForwardedProtoFor)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_PROTO).unwrap(), "http");
	}

	#[tokio::test]
	async fn proto_reflects_tls_connection() {
		let mut ctx = test_ctx(
			Request::builder()
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		ctx.tls = Some(super::super::TlsConnectionInfo::default());
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(XForwardedProtoFor)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_PROTO).unwrap(), "https");
	}
}
