//! Spec §2 item 18: the terminal stage. Selects an endpoint through the
//! §4.11 iterator (or, on an active route-service detour, dispatches
//! straight to the detour), hands the rewritten request to the transport
//! collaborator, and copies its response onto the writer.

use std::sync::Arc;

use async_trait::async_trait;
use axum_core::body::Body;
use http::Uri;
use http::header::COOKIE;
use http_body_util::BodyExt;

use super::{Middleware, Next, PipelineContext};
use crate::errors::PipelineError;
use crate::registry::{Endpoint, EndpointIterator, EndpointPool, RouteKey};
use crate::response_writer::BodyError;
use crate::transport::TransportError;

pub struct BackendDispatch;

fn sticky_ids(req: &http::Request<Body>, cookie_names: &[String]) -> Vec<String> {
	let Some(cookie_header) = req.headers().get(COOKIE).and_then(|v| v.to_str().ok()) else {
		return Vec::new();
	};
	let mut ids = Vec::new();
	for pair in cookie_header.split(';') {
		let Some((name, value)) = pair.trim().split_once('=') else {
			continue;
		};
		if cookie_names.iter().any(|n| n.eq_ignore_ascii_case(name.trim())) {
			ids.push(value.trim().to_string());
		}
	}
	ids
}

impl BackendDispatch {
	fn select_endpoint(ctx: &mut PipelineContext, pool: &EndpointPool) -> Option<Arc<Endpoint>> {
		let sticky = sticky_ids(&ctx.req, &ctx.config.sticky_session_cookie_names);
		let mut it = EndpointIterator::new(
			pool.endpoints().cloned(),
			ctx.config.load_balance_policy,
			pool.max_conns_per_backend(),
			&sticky,
			ctx.config.local_zone.as_deref(),
		);
		it.next()
	}

	async fn dispatch_to_endpoint(ctx: &mut PipelineContext, endpoint: Arc<Endpoint>) {
		ctx.info.route_endpoint = Some(endpoint.clone());
		endpoint.incr_connections();
		Self::dispatch_to_authority(ctx, &endpoint.canonical_addr()).await;
		endpoint.decr_connections();
	}

	/// Shared terminal leg for all three dispatch targets: a selected pool
	/// endpoint, an external route-service detour, or an internal hairpinned
	/// one. Only the target authority differs between them.
	async fn dispatch_to_authority(ctx: &mut PipelineContext, authority: &str) {
		ctx.info.mark_app_request_started();
		let outbound = Self::rewrite_for(&mut ctx.req, authority);
		ctx.info.backend_req_headers = Some(outbound.headers().clone());

		let result = ctx.transport.round_trip(outbound).await;
		ctx.info.mark_app_request_finished();

		match result {
			Ok(resp) => {
				ctx.info.round_trip_successful = true;
				let (parts, body) = resp.into_parts();
				ctx.writer.write_status(parts.status);
				for (name, value) in parts.headers.iter() {
					ctx.writer.headers_mut().append(name, value.clone());
				}
				let boxed: crate::response_writer::ResponseBody =
					body.map_err(|e| Box::new(e) as BodyError).boxed();
				ctx.writer.set_streaming_body(boxed);
			},
			Err(err) => {
				ctx.info.round_trip_successful = false;
				ctx.fail(map_transport_error(err));
			},
		}
	}

	fn rewrite_for(req: &mut http::Request<Body>, authority: &str) -> http::Request<Body> {
		let taken = std::mem::replace(req, http::Request::new(Body::empty()));
		let (mut parts, body) = taken.into_parts();
		let path_and_query = parts
			.uri
			.path_and_query()
			.map(|pq| pq.as_str().to_string())
			.unwrap_or_else(|| "/".to_string());
		if let Ok(new_uri) = format!("http://{authority}{path_and_query}").parse::<Uri>() {
			parts.uri = new_uri;
		}
		http::Request::from_parts(parts, body)
	}
}

fn map_transport_error(err: TransportError) -> PipelineError {
	match err {
		TransportError::Tls(e) => PipelineError::UpstreamTls(e),
		TransportError::Io(e) => PipelineError::UpstreamTransport(e),
		TransportError::Timeout => PipelineError::UpstreamTimeout,
	}
}

#[async_trait]
impl Middleware for BackendDispatch {
	async fn handle(&self, ctx: &mut PipelineContext, _next: Next<'_>) {
		if ctx.info.should_route_to_internal_route_service {
			let Some(uri) = ctx.info.route_service_url.clone() else {
				return ctx.fail(PipelineError::Internal);
			};
			let Some(host) = uri.host() else {
				return ctx.fail(PipelineError::Internal);
			};
			let key = RouteKey::new(host, uri.path());
			let Some(pool) = ctx.registry.lookup(&key) else {
				return ctx.fail(PipelineError::Internal);
			};
			return match Self::select_endpoint(ctx, &pool) {
				Some(endpoint) => Self::dispatch_to_endpoint(ctx, endpoint).await,
				None => ctx.fail(PipelineError::ConnectionLimitReached),
			};
		}

		if let Some(uri) = ctx.info.route_service_url.clone() {
			let authority = uri.authority().map(|a| a.as_str().to_string()).unwrap_or_default();
			if authority.is_empty() {
				return ctx.fail(PipelineError::Internal);
			}
			return Self::dispatch_to_authority(ctx, &authority).await;
		}

		let Some(pool) = ctx.info.route_pool.clone() else {
			return ctx.fail(PipelineError::Internal);
		};

		match Self::select_endpoint(ctx, &pool) {
			Some(endpoint) => Self::dispatch_to_endpoint(ctx, endpoint).await,
			None => ctx.fail(PipelineError::ConnectionLimitReached),
		}
	}
}
