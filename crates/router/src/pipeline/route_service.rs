//! Spec §4.12: the signed-detour protocol. Evaluated in order: not a
//! route-service route, disabled-but-requested, upgrade-on-detour,
//! validate-an-inbound-round-trip, or sign-and-emit-the-first-leg.

use async_trait::async_trait;
use http::header::{CONNECTION, HeaderName, UPGRADE};
use http::{HeaderValue, Uri};

use super::{Middleware, Next, PipelineContext};
use crate::crypto::Signature;
use crate::errors::PipelineError;
use crate::registry::{EndpointPool, RouteKey, host_without_port};

const X_CF_ROUTE_SERVICE_SIGNATURE: HeaderName = HeaderName::from_static("x-cf-route-service-signature");
const X_CF_ROUTE_SERVICE_METADATA: HeaderName = HeaderName::from_static("x-cf-route-service-metadata");
const X_CF_ROUTE_SERVICE_FORWARDED_URL: HeaderName = HeaderName::from_static("x-cf-route-service-forwarded-url");

pub struct RouteService;

fn is_upgrade_request(req: &http::Request<axum_core::body::Body>) -> bool {
	let connection_has_upgrade = req
		.headers()
		.get(CONNECTION)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
		.unwrap_or(false);
	connection_has_upgrade && req.headers().contains_key(UPGRADE)
}

fn forwarded_url(host: &str, path_and_query: &str, recommend_https: bool) -> String {
	let scheme = if recommend_https { "https" } else { "http" };
	format!("{scheme}://{}{path_and_query}", host_without_port(host))
}

#[async_trait]
impl Middleware for RouteService {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let detour = ctx.info.route_pool.as_ref().and_then(|p| p.route_service_url()).map(str::to_string);
		let Some(detour_url) = detour.filter(|u| !u.is_empty()) else {
			return next.run(ctx).await;
		};

		if !ctx.config.route_service_enabled {
			return ctx.fail(PipelineError::RouteServiceUnsupported);
		}

		if is_upgrade_request(&ctx.req) {
			return ctx.fail(PipelineError::RouteServiceUpgradeUnsupported);
		}

		let inbound_signature = ctx
			.req
			.headers()
			.get(X_CF_ROUTE_SERVICE_SIGNATURE)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);

		if let Some(signature) = inbound_signature {
			let metadata = ctx
				.req
				.headers()
				.get(X_CF_ROUTE_SERVICE_METADATA)
				.and_then(|v| v.to_str().ok())
				.map(str::to_string);
			let claimed_forwarded_url = ctx
				.req
				.headers()
				.get(X_CF_ROUTE_SERVICE_FORWARDED_URL)
				.and_then(|v| v.to_str().ok())
				.map(str::to_string);

			let valid = (|| -> Option<()> {
				let metadata = metadata?;
				let claimed_forwarded_url = claimed_forwarded_url?;
				let sig = ctx
					.route_service_crypto
					.open(&signature, &metadata, std::time::SystemTime::now())
					.ok()?;

				let host = ctx.host_header()?.to_string();
				let path_and_query = ctx
					.req
					.uri()
					.path_and_query()
					.map(|pq| pq.as_str().to_string())
					.unwrap_or_default();
				let reconstructed = forwarded_url(&host, &path_and_query, ctx.config.route_service_recommend_https);
				if reconstructed != sig.forwarded_url || sig.forwarded_url != claimed_forwarded_url {
					return None;
				}

				let key = RouteKey::new(&host, ctx.req.uri().path());
				let resolved_pool = ctx.registry.lookup(&key)?;
				let current_pool = ctx.info.route_pool.as_ref()?;
				if !EndpointPool::pools_match(&resolved_pool, current_pool) {
					return None;
				}
				Some(())
			})()
			.is_some();

			if !valid {
				return ctx.fail(PipelineError::RouteServiceValidation);
			}

			ctx.route_service_return_validated = true;
			let headers = ctx.req.headers_mut();
			headers.remove(X_CF_ROUTE_SERVICE_SIGNATURE);
			headers.remove(X_CF_ROUTE_SERVICE_METADATA);
			headers.remove(X_CF_ROUTE_SERVICE_FORWARDED_URL);
			return next.run(ctx).await;
		}

		// First leg: sign and emit.
		let host = ctx.host_header().unwrap_or("").to_string();
		let path_and_query = ctx
			.req
			.uri()
			.path_and_query()
			.map(|pq| pq.as_str().to_string())
			.unwrap_or_default();
		let forwarded = forwarded_url(&host, &path_and_query, ctx.config.route_service_recommend_https);
		let sig = Signature::new(std::time::SystemTime::now(), forwarded.clone());

		let Ok((ciphertext, nonce)) = ctx.route_service_crypto.seal(&sig) else {
			return ctx.fail(PipelineError::Internal);
		};

		if let (Ok(sig_v), Ok(meta_v), Ok(url_v)) = (
			HeaderValue::from_str(&ciphertext),
			HeaderValue::from_str(&nonce),
			HeaderValue::from_str(&forwarded),
		) {
			let headers = ctx.req.headers_mut();
			headers.insert(X_CF_ROUTE_SERVICE_SIGNATURE, sig_v);
			headers.insert(X_CF_ROUTE_SERVICE_METADATA, meta_v);
			headers.insert(X_CF_ROUTE_SERVICE_FORWARDED_URL, url_v);
		}

		if let Ok(uri) = detour_url.parse::<Uri>() {
			let should_hairpin = ctx.config.route_service_hairpinning
				&& uri
					.host()
					.map(|h| {
						let key = RouteKey::new(h, "/");
						ctx.registry.lookup(&key).is_some()
					})
					.unwrap_or(false);
			ctx.info.should_route_to_internal_route_service = should_hairpin;
			ctx.info.route_service_url = Some(uri);
		}

		next.run(ctx).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use http::{Request, StatusCode};

	use super::*;
	use crate::crypto::{RouteServiceCrypto, RouteServiceKey};
	use crate::pipeline::test_support::test_ctx;
	use crate::registry::{Endpoint, EndpointPool};

	fn pool_with_route_service(url: &str) -> Arc<EndpointPool> {
		let mut ep = Endpoint::new("app-1", "10.0.0.5", 8080);
		ep.route_service_url = Some(url.to_string());
		Arc::new(EndpointPool::new("example.com", "/foo", vec![Arc::new(ep)], 0))
	}

	fn ctx_for_host(host: &str) -> PipelineContext {
		test_ctx(
			Request::builder()
				.uri("http://example.com/foo")
				.header(http::header::HOST, host)
				.body(axum_core::body::Body::empty())
				.unwrap(),
		)
	}

	#[tokio::test]
	async fn passes_through_when_no_route_service_configured() {
		let mut ctx = ctx_for_host("example.com");
		ctx.info.route_pool = Some(Arc::new(EndpointPool::new("example.com", "/foo", vec![], 0)));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RouteService)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
	}

	#[tokio::test]
	async fn rejects_when_disabled() {
		let mut ctx = ctx_for_host("example.com");
		ctx.info.route_pool = Some(pool_with_route_service("https://rs.example.com"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RouteService)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::BAD_GATEWAY);
		assert_eq!(ctx.router_error, Some("route_service_unsupported"));
	}

	#[tokio::test]
	async fn first_leg_signs_and_emits_headers() {
		let mut ctx = ctx_for_host("example.com");
		ctx.info.route_pool = Some(pool_with_route_service("https://rs.example.com"));
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.route_service_enabled = true;
			c
		});
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RouteService)];
		Next::new(&chain).run(&mut ctx).await;
		assert!(ctx.req.headers().get(X_CF_ROUTE_SERVICE_SIGNATURE).is_some());
		assert!(ctx.req.headers().get(X_CF_ROUTE_SERVICE_METADATA).is_some());
		assert!(ctx.req.headers().get(X_CF_ROUTE_SERVICE_FORWARDED_URL).is_some());
		assert_eq!(ctx.info.route_service_url.unwrap().host(), Some("rs.example.com"));
	}

	#[tokio::test]
	async fn valid_round_trip_strips_headers_and_continues() {
		let crypto = Arc::new(RouteServiceCrypto::new(RouteServiceKey::from_bytes([7u8; 32]), None, Duration::from_secs(30)));
		let forwarded = "https://example.com/foo";
		let sig = Signature::new(std::time::SystemTime::now(), forwarded);
		let (ciphertext, nonce) = crypto.seal(&sig).unwrap();

		let mut req = Request::builder()
			.uri("http://example.com/foo")
			.header(http::header::HOST, "example.com")
			.header(X_CF_ROUTE_SERVICE_SIGNATURE, ciphertext)
			.header(X_CF_ROUTE_SERVICE_METADATA, nonce)
			.header(X_CF_ROUTE_SERVICE_FORWARDED_URL, forwarded)
			.body(axum_core::body::Body::empty())
			.unwrap();
		let mut ctx = test_ctx(req);
		ctx.route_service_crypto = crypto;
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.route_service_enabled = true;
			c.route_service_recommend_https = true;
			c
		});
		let pool = pool_with_route_service("https://rs.example.com");
		let registry = Arc::new(crate::registry::InMemoryRegistry::new());
		registry.upsert(RouteKey::new("example.com", "/foo"), pool.clone());
		ctx.registry = registry;
		ctx.info.route_pool = Some(pool);

		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RouteService)];
		Next::new(&chain).run(&mut ctx).await;

		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
		assert!(ctx.req.headers().get(X_CF_ROUTE_SERVICE_SIGNATURE).is_none());
		assert!(ctx.route_service_return_validated);
	}

	#[tokio::test]
	async fn tampered_round_trip_is_rejected() {
		let crypto = Arc::new(RouteServiceCrypto::new(RouteServiceKey::from_bytes([7u8; 32]), None, Duration::from_secs(30)));
		let sig = Signature::new(std::time::SystemTime::now(), "https://example.com/foo");
		let (mut ciphertext, nonce) = crypto.seal(&sig).unwrap();
		ciphertext.push('A');

		let req = Request::builder()
			.uri("http://example.com/foo")
			.header(http::header::HOST, "example.com")
			.header(X_CF_ROUTE_SERVICE_SIGNATURE, ciphertext)
			.header(X_CF_ROUTE_SERVICE_METADATA, nonce)
			.header(X_CF_ROUTE_SERVICE_FORWARDED_URL, "https://example.com/foo")
			.body(axum_core::body::Body::empty())
			.unwrap();
		let mut ctx = test_ctx(req);
		ctx.route_service_crypto = crypto;
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.route_service_enabled = true;
			c
		});
		ctx.info.route_pool = Some(pool_with_route_service("https://rs.example.com"));

		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RouteService)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::BAD_REQUEST);
		assert_eq!(ctx.router_error, None);
	}

	#[tokio::test]
	async fn upgrade_request_with_active_detour_is_rejected() {
		let mut req = ctx_for_host("example.com").req;
		req.headers_mut().insert(CONNECTION, HeaderValue::from_static("Upgrade"));
		req.headers_mut().insert(UPGRADE, HeaderValue::from_static("websocket"));
		let mut ctx = test_ctx(req);
		ctx.config = Arc::new({
			let mut c = crate::config::RouterConfig::default();
			c.route_service_enabled = true;
			c
		});
		ctx.info.route_pool = Some(pool_with_route_service("https://rs.example.com"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RouteService)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::SERVICE_UNAVAILABLE);
	}
}
