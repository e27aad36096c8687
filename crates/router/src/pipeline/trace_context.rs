//! Spec §2 item 7 + §4.5: establishes one coherent set of trace identifiers
//! for the request — reusing whatever the peer handed us in B3 or W3C form
//! when present, generating fresh ones otherwise — and stamps `X-B3-*`,
//! `traceparent`/`tracestate` and `X-Vcap-Request-Id` on the outbound
//! request before it reaches any later stage.

use async_trait::async_trait;
use http::HeaderValue;
use http::header::HeaderName;

use super::{Middleware, Next, PipelineContext};
use crate::trace::{self, TraceInfo, b3, w3c};

const X_VCAP_REQUEST_ID: HeaderName = HeaderName::from_static("x-vcap-request-id");

pub struct TraceContext;

#[async_trait]
impl Middleware for TraceContext {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let inbound_b3 = b3::parse(ctx.req.headers());
		let inbound_traceparent = w3c::parse(ctx.req.headers());
		let inbound_tracestate = ctx
			.req
			.headers()
			.get(w3c::TRACESTATE)
			.and_then(|v| v.to_str().ok())
			.map(w3c::parse_tracestate)
			.unwrap_or_default();

		let trace_info = if let Some(tp) = &inbound_traceparent {
			TraceInfo::from_peer_trace_id(&tp.trace_id_hex())
		} else if let Some(b3ctx) = &inbound_b3 {
			TraceInfo::from_peer_trace_id(&b3ctx.trace_id)
		} else {
			TraceInfo::generate()
		};

		let headers = ctx.req.headers_mut();

		let parent_span_id = inbound_b3.as_ref().map(|c| c.span_id.clone());
		b3::write(headers, &trace_info.trace_id, &trace_info.span_id, parent_span_id.as_deref());

		let traceparent = w3c::Traceparent {
			version: 0,
			trace_id: trace::trace_id_to_bytes16(&trace_info.trace_id),
			parent_id: trace::span_id_to_bytes8(&trace_info.span_id),
			flags: 1,
		};
		let vendor_key = w3c::vendor_key(&ctx.config.trace_vendor_id, ctx.config.trace_tenant_id.as_deref());
		let tracestate = w3c::with_vendor_entry(inbound_tracestate, &vendor_key, &trace_info.span_id);
		w3c::write(headers, &traceparent, &tracestate);

		// Always overwrites an inbound value, per spec.
		if let Ok(v) = HeaderValue::from_str(&trace_info.vcap_request_id()) {
			headers.insert(X_VCAP_REQUEST_ID, v);
		}

		ctx.info.trace = trace_info;

		next.run(ctx).await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::pipeline::test_support::{get, test_ctx};

	#[tokio::test]
	async fn generates_fresh_ids_when_no_peer_headers_present() {
		let mut ctx = test_ctx(get("http://example.com/"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(TraceContext)];
		Next::new(&chain).run(&mut ctx).await;

		assert_eq!(ctx.info.trace.trace_id.len(), 32);
		assert_eq!(ctx.info.trace.span_id.len(), 16);
		assert_eq!(
			ctx.req.headers().get(X_VCAP_REQUEST_ID).unwrap(),
			&ctx.info.trace.vcap_request_id()
		);
	}

	#[tokio::test]
	async fn reuses_inbound_b3_trace_id_with_fresh_span() {
		let mut req = get("http://example.com/");
		req.headers_mut().insert(b3::B3_TRACE_ID, HeaderValue::from_static("0123456789abcdef"));
		req.headers_mut().insert(b3::B3_SPAN_ID, HeaderValue::from_static("fedcba9876543210"));
		let mut ctx = test_ctx(req);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(TraceContext)];
		Next::new(&chain).run(&mut ctx).await;

		assert_eq!(ctx.info.trace.trace_id, "0123456789abcdef");
		assert_ne!(ctx.info.trace.span_id, "fedcba9876543210");
		assert_eq!(
			ctx.req.headers().get(b3::B3_PARENT_SPAN_ID).unwrap(),
			"fedcba9876543210"
		);
	}

	#[tokio::test]
	async fn reuses_inbound_w3c_traceparent_trace_id() {
		let mut req = get("http://example.com/");
		req.headers_mut().insert(
			w3c::TRACEPARENT,
			HeaderValue::from_static("00-0123456789abcdef0123456789abcdef-0123456789abcdef-01"),
		);
		let mut ctx = test_ctx(req);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(TraceContext)];
		Next::new(&chain).run(&mut ctx).await;

		assert_eq!(ctx.info.trace.trace_id, "0123456789abcdef0123456789abcdef");
		let out = w3c::parse(ctx.req.headers()).unwrap();
		assert_eq!(out.trace_id_hex(), "0123456789abcdef0123456789abcdef");
	}

	#[tokio::test]
	async fn outbound_vcap_request_id_overwrites_inbound_value() {
		let mut req = get("http://example.com/");
		req.headers_mut().insert(X_VCAP_REQUEST_ID, HeaderValue::from_static("stale-value"));
		let mut ctx = test_ctx(req);
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(TraceContext)];
		Next::new(&chain).run(&mut ctx).await;

		assert_ne!(ctx.req.headers().get(X_VCAP_REQUEST_ID).unwrap(), "stale-value");
	}

	#[tokio::test]
	async fn vendor_entry_is_added_to_tracestate() {
		let mut ctx = test_ctx(get("http://example.com/"));
		let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(TraceContext)];
		Next::new(&chain).run(&mut ctx).await;

		let tracestate = ctx
			.req
			.headers()
			.get(w3c::TRACESTATE)
			.and_then(|v| v.to_str().ok())
			.map(w3c::parse_tracestate)
			.unwrap();
		assert_eq!(tracestate.0[0].key, ctx.config.trace_vendor_id);
	}
}
