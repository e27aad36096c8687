//! Spec §2 item 6 + §4.14: installs a counting body reader at pipeline
//! entry and, once the rest of the chain returns, populates and hands off
//! the access-log record.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum_core::body::Body;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;

use super::{Middleware, Next, PipelineContext};
use crate::access_log::AccessLogRecord;

pin_project! {
	struct CountingRequestBody {
		#[pin]
		inner: Body,
		counter: crate::access_log::RequestByteCounter,
	}
}

impl http_body::Body for CountingRequestBody {
	type Data = Bytes;
	type Error = axum_core::Error;

	fn poll_frame(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
		let this = self.project();
		let result = std::task::ready!(this.inner.poll_frame(cx));
		if let Some(Ok(frame)) = &result {
			if let Some(data) = frame.data_ref() {
				this.counter.add(data.len() as u64);
			}
		}
		Poll::Ready(result)
	}

	fn is_end_stream(&self) -> bool {
		self.inner.is_end_stream()
	}

	fn size_hint(&self) -> SizeHint {
		self.inner.size_hint()
	}
}

pub struct AccessLogStart;

#[async_trait]
impl Middleware for AccessLogStart {
	async fn handle(&self, ctx: &mut PipelineContext, next: Next<'_>) {
		let old_body = std::mem::replace(ctx.req.body_mut(), Body::empty());
		let wrapped = CountingRequestBody {
			inner: old_body,
			counter: ctx.request_bytes.clone(),
		};
		*ctx.req.body_mut() = Body::new(wrapped);

		next.run(ctx).await;

		let record = AccessLogRecord {
			remote_addr: ctx.remote_addr,
			host: ctx.host_header().unwrap_or("").to_string(),
			method: ctx.req.method().to_string(),
			uri: ctx.req.uri().to_string(),
			status: ctx.writer.status_code().as_u16(),
			router_error: ctx.router_error,
			request_bytes_read: ctx.request_bytes.get(),
			response_bytes_written: ctx.writer.bytes_written_so_far(),
			duration: ctx.info.finished_at.unwrap_or_else(std::time::Instant::now)
				.saturating_duration_since(ctx.info.received_at),
			app_request_duration: ctx.info.app_request_duration(),
			endpoint_addr: AccessLogRecord::endpoint_addr_of(ctx.info.route_endpoint.as_ref()),
			application_id: ctx.info.route_endpoint.as_ref().map(|e| e.application_id.clone()),
			trace_id: ctx.info.trace.trace_id.clone(),
			span_id: ctx.info.trace.span_id.clone(),
			backend_req_headers: ctx.info.backend_req_headers.clone(),
		};
		ctx.access_logger.log(record);
	}
}
