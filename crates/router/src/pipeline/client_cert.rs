//! Spec §4.8: strips, forwards, or replaces `X-Forwarded-Client-Cert`
//! according to the configured mode, honoring the two predicates that can
//! override it outright.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::HeaderValue;
use http::header::HeaderName;

use super::{Middleware, Next, PipelineContext};
use crate::config::ForwardedClientCertMode;

const X_FORWARDED_CLIENT_CERT: HeaderName = HeaderName::from_static("x-forwarded-client-cert");

pub struct ClientCertSanitizer;

#[async_trait]
impl Middleware for ClientCertSanitizer {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		if ctx.force_delete_client_cert_header {
			ctx.req.headers_mut().remove(X_FORWARDED_CLIENT_CERT);
			return next.run(ctx).await;
		}

		if !ctx.route_service_return_validated {
			match ctx.config.forwarded_client_cert_mode {
				ForwardedClientCertMode::AlwaysForward => {},
				ForwardedClientCertMode::Forward => {
					let has_peer_cert = ctx.tls.as_ref().is_some_and(|t| t.peer_certificate_der.is_some());
					if !has_peer_cert {
						ctx.req.headers_mut().remove(X_FORWARDED_CLIENT_CERT);
					}
				},
				ForwardedClientCertMode::SanitizeSet => {
					ctx.req.headers_mut().remove(X_FORWARDED_CLIENT_CERT);
					if let Some(der) = ctx.tls.as_ref().and_then(|t| t.peer_certificate_der.as_ref()) {
						let encoded = BASE64.encode(der);
						if let Ok(v) = HeaderValue::from_str(&encoded) {
							ctx.req.headers_mut().insert(X_FORWARDED_CLIENT_CERT, v);
						}
					}
				},
			}
		}

		next.run(ctx).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use http::Request;

	use super::*;
	use crate::pipeline::TlsConnectionInfo;
	use crate::pipeline::test_support::test_ctx;

	fn req_with_xfcc() -> Request<axum_core::body::Body> {
		Request::builder()
			.uri("http://example.com/")
			.header(X_FORWARDED_CLIENT_CERT, "inbound-claim")
			.body(axum_core::body::Body::empty())
			.unwrap()
	}

	#[tokio::test]
	async fn always_forward_passes_header_through_untouched() {
		let mut ctx = test_ctx(req_with_xfcc());
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.forwarded_client_cert_mode = ForwardedClientCertMode::AlwaysForward;
			c
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ClientCertSanitizer)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_CLIENT_CERT).unwrap(), "inbound-claim");
	}

	#[tokio::test]
	async fn forward_strips_header_without_a_peer_cert() {
		let mut ctx = test_ctx(req_with_xfcc());
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ClientCertSanitizer)];
		Next::new(&chain).run(&mut ctx).await;
		assert!(ctx.req.headers().get(X_FORWARDED_CLIENT_CERT).is_none());
	}

	#[tokio::test]
	async fn forward_keeps_header_with_a_peer_cert() {
		let mut ctx = test_ctx(req_with_xfcc());
		ctx.tls = Some(TlsConnectionInfo {
			peer_certificate_der: Some(vec![1, 2, 3]),
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ClientCertSanitizer)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_CLIENT_CERT).unwrap(), "inbound-claim");
	}

	#[tokio::test]
	async fn sanitize_set_replaces_inbound_claim_with_peer_cert() {
		let mut ctx = test_ctx(req_with_xfcc());
		ctx.tls = Some(TlsConnectionInfo {
			peer_certificate_der: Some(vec![1, 2, 3]),
		});
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.forwarded_client_cert_mode = ForwardedClientCertMode::SanitizeSet;
			c
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ClientCertSanitizer)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(
			ctx.req.headers().get(X_FORWARDED_CLIENT_CERT).unwrap(),
			&BASE64.encode([1, 2, 3])
		);
	}

	#[tokio::test]
	async fn force_delete_overrides_every_mode() {
		let mut ctx = test_ctx(req_with_xfcc());
		ctx.force_delete_client_cert_header = true;
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.forwarded_client_cert_mode = ForwardedClientCertMode::AlwaysForward;
			c
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ClientCertSanitizer)];
		Next::new(&chain).run(&mut ctx).await;
		assert!(ctx.req.headers().get(X_FORWARDED_CLIENT_CERT).is_none());
	}

	#[tokio::test]
	async fn skip_sanitization_leaves_header_untouched() {
		let mut ctx = test_ctx(req_with_xfcc());
		ctx.route_service_return_validated = true;
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(ClientCertSanitizer)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.req.headers().get(X_FORWARDED_CLIENT_CERT).unwrap(), "inbound-claim");
	}
}
