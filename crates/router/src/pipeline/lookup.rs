//! Spec §4.10: validates `Host`/`X-CF-App-Instance`, resolves the route
//! pool from the registry, and classifies empty/overloaded/missing-route
//! outcomes into their respective short-circuit responses.

use async_trait::async_trait;
use http::HeaderValue;
use http::header::{CACHE_CONTROL, HeaderName};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Middleware, Next, PipelineContext};
use crate::config::EmptyPoolResponsePolicy;
use crate::errors::PipelineError;
use crate::metrics::EmptyLabels;
use crate::registry::{InstanceKey, RouteKey, host_without_port};

const X_CF_APP_INSTANCE: HeaderName = HeaderName::from_static("x-cf-app-instance");

static APP_INSTANCE_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[0-9a-f]{8}-([0-9a-f]{4}-){3}[0-9a-f]{12}:\d+$").unwrap());

pub struct Lookup;

#[async_trait]
impl Middleware for Lookup {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let host = ctx.host_header().unwrap_or("").to_string();
		if host.is_empty() || host_without_port(&host) == ctx.remote_addr.ip().to_string() {
			ctx
				.writer
				.headers_mut()
				.insert(CACHE_CONTROL, HeaderValue::from_static("public,max-age=2"));
			return ctx.fail(PipelineError::EmptyHost);
		}

		let instance_header = ctx
			.req
			.headers()
			.get(X_CF_APP_INSTANCE)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);

		if let Some(instance) = &instance_header {
			if !APP_INSTANCE_RE.is_match(instance) {
				ctx
					.writer
					.headers_mut()
					.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
				return ctx.fail(PipelineError::InvalidAppInstanceHeader);
			}
		}

		let key = RouteKey::new(&host, ctx.req.uri().path());

		let pool = match &instance_header {
			Some(instance) => {
				let (app_id, index) = instance.split_once(':').unwrap();
				let index: u32 = index.parse().unwrap_or(0);
				ctx.registry.lookup_with_instance(&key, InstanceKey { app_id, index })
			},
			None => ctx.registry.lookup(&key),
		};

		let pool = match pool {
			Some(pool) => pool,
			None => {
				ctx
					.writer
					.headers_mut()
					.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
				if let Some(instance) = &instance_header {
					return ctx.fail(PipelineError::InstanceNotFound(instance.clone()));
				}
				return ctx.fail(PipelineError::UnknownRoute(host));
			},
		};

		if pool.is_empty() {
			ctx
				.writer
				.headers_mut()
				.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
			return match ctx.config.empty_pool_response_policy {
				EmptyPoolResponsePolicy::NoEndpoints => ctx.fail(PipelineError::NoEndpoints),
				EmptyPoolResponsePolicy::UnknownRoute => ctx.fail(PipelineError::UnknownRoute(host)),
			};
		}

		if pool.is_overloaded() {
			ctx.metrics.backend_exhausted.get_or_create(&EmptyLabels {}).inc();
			return ctx.fail(PipelineError::ConnectionLimitReached);
		}

		ctx.info.route_pool = Some(pool);
		next.run(ctx).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use http::{Request, StatusCode};

	use super::*;
	use crate::pipeline::test_support::test_ctx;
	use crate::registry::{Endpoint, EndpointPool, InMemoryRegistry};

	fn req_with_host(host: &str) -> Request<axum_core::body::Body> {
		Request::builder()
			.uri("http://example.com/foo")
			.header(http::header::HOST, host)
			.body(axum_core::body::Body::empty())
			.unwrap()
	}

	#[tokio::test]
	async fn empty_host_is_rejected() {
		let mut ctx = test_ctx(
			Request::builder()
				.uri("http://example.com/")
				.body(axum_core::body::Body::empty())
				.unwrap(),
		);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::BAD_REQUEST);
		assert_eq!(ctx.router_error, Some("empty_host"));
	}

	#[tokio::test]
	async fn host_equal_to_remote_ip_is_rejected() {
		let mut ctx = test_ctx(req_with_host("10.0.0.1"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.router_error, Some("empty_host"));
	}

	#[tokio::test]
	async fn invalid_app_instance_header_is_rejected() {
		let mut req = req_with_host("example.com");
		req.headers_mut().insert(X_CF_APP_INSTANCE, HeaderValue::from_static("not-a-guid"));
		let mut ctx = test_ctx(req);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::BAD_REQUEST);
		assert_eq!(ctx.router_error, Some("invalid_cf_app_instance_header"));
	}

	#[tokio::test]
	async fn unknown_route_returns_404() {
		let mut ctx = test_ctx(req_with_host("example.com"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::NOT_FOUND);
		assert_eq!(ctx.router_error, Some("unknown_route"));
	}

	#[tokio::test]
	async fn resolved_route_stores_pool_and_continues() {
		let registry = Arc::new(InMemoryRegistry::new());
		let endpoint = Arc::new(Endpoint::new("app-1", "10.0.0.5", 8080));
		let key = RouteKey::new("example.com", "/foo");
		registry.upsert(key, Arc::new(EndpointPool::new("example.com", "/foo", vec![endpoint], 0)));

		let mut ctx = test_ctx(req_with_host("example.com"));
		ctx.registry = registry;
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::OK);
		assert!(ctx.info.route_pool.is_some());
	}

	#[tokio::test]
	async fn empty_pool_with_strict_policy_returns_503() {
		let registry = Arc::new(InMemoryRegistry::new());
		let key = RouteKey::new("example.com", "/foo");
		registry.upsert(key, Arc::new(EndpointPool::new("example.com", "/foo", vec![], 0)));

		let mut ctx = test_ctx(req_with_host("example.com"));
		ctx.registry = registry;
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::SERVICE_UNAVAILABLE);
		assert_eq!(ctx.router_error, Some("no_endpoints"));
	}

	#[tokio::test]
	async fn overloaded_pool_increments_backend_exhausted_metric() {
		let registry = Arc::new(InMemoryRegistry::new());
		let endpoint = Arc::new(Endpoint::new("app-1", "10.0.0.5", 8080));
		endpoint.incr_connections();
		let key = RouteKey::new("example.com", "/foo");
		registry.upsert(key, Arc::new(EndpointPool::new("example.com", "/foo", vec![endpoint], 1)));

		let mut ctx = test_ctx(req_with_host("example.com"));
		ctx.registry = registry;
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Lookup)];
		Next::new(&chain).run(&mut ctx).await;
		assert_eq!(ctx.writer.status_code(), StatusCode::SERVICE_UNAVAILABLE);
		assert_eq!(ctx.router_error, Some("Connection Limit Reached"));
		assert_eq!(ctx.metrics.backend_exhausted.get_or_create(&EmptyLabels {}).get(), 1);
	}
}
