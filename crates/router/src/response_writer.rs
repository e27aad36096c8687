//! The wrapped response writer every middleware sees. `RequestInfo` is
//! owned by a single task for the lifetime of a request, so
//! `ProxyResponseWriter` is a plain `&mut`-mutated struct rather than a
//! shared/locked one — the only state that needs to outlive `finish()` is
//! the byte counter the access logger reads afterwards, which is split out
//! into `ResponseMeta`.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use pin_project_lite::pin_project;
use thiserror::Error;
use tokio::sync::watch;

pub type BodyError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type ResponseBody = BoxBody<Bytes, BodyError>;

fn empty_body() -> ResponseBody {
	Full::new(Bytes::new())
		.map_err(|never: std::convert::Infallible| match never {})
		.boxed()
}

/// A one-shot body for admin/metrics responses, which never stream.
pub fn simple_body(data: impl Into<Bytes>) -> ResponseBody {
	Full::new(data.into())
		.map_err(|never: std::convert::Infallible| match never {})
		.boxed()
}

/// A stream suitable for handing off to a connection that has been
/// hijacked out of the normal response path.
pub trait HijackedStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> HijackedStream for T {}

pub struct HijackedIo {
	pub stream: Box<dyn HijackedStream>,
}

#[derive(Debug, Error)]
pub enum HijackError {
	#[error("underlying transport does not support hijacking")]
	Unsupported,
	#[error("connection was already hijacked")]
	AlreadyHijacked,
}

type HijackFn = Box<dyn FnOnce() -> Result<HijackedIo, HijackError> + Send>;

/// A header mutation applied exactly once, immediately before the status
/// line is flushed. Must be idempotent under repeated application even
/// though the framework only ever applies it once.
pub trait HeaderRewriter: Send + Sync {
	fn rewrite(&self, headers: &mut HeaderMap);
}

impl<F: Fn(&mut HeaderMap) + Send + Sync> HeaderRewriter for F {
	fn rewrite(&self, headers: &mut HeaderMap) {
		self(headers)
	}
}

/// Read-only handle to a response's outcome, retained by the access logger
/// after `finish()` has consumed the writer.
#[derive(Clone)]
pub struct ResponseMeta {
	bytes_written: Arc<AtomicU64>,
	status: StatusCode,
}

impl ResponseMeta {
	pub fn bytes_written(&self) -> u64 {
		self.bytes_written.load(Ordering::Relaxed)
	}

	pub fn status(&self) -> StatusCode {
		self.status
	}
}

pub struct ProxyResponseWriter {
	status: Option<StatusCode>,
	headers: HeaderMap,
	rewriters: Vec<Box<dyn HeaderRewriter>>,
	body_chunks: Vec<Bytes>,
	streaming_body: Option<ResponseBody>,
	bytes_written: Arc<AtomicU64>,
	done: bool,
	hijacked: bool,
	hijack_fn: Option<HijackFn>,
	close_tx: watch::Sender<bool>,
	close_rx: watch::Receiver<bool>,
}

impl ProxyResponseWriter {
	/// `hijack_fn` is supplied by the connection driver when the underlying
	/// transport can hand over its raw socket; `None` means hijacking always
	/// fails with [`HijackError::Unsupported`].
	pub fn new(hijack_fn: Option<HijackFn>) -> Self {
		let (close_tx, close_rx) = watch::channel(false);
		ProxyResponseWriter {
			status: None,
			headers: HeaderMap::new(),
			rewriters: Vec::new(),
			body_chunks: Vec::new(),
			streaming_body: None,
			bytes_written: Arc::new(AtomicU64::new(0)),
			done: false,
			hijacked: false,
			hijack_fn,
			close_tx,
			close_rx,
		}
	}

	/// Records the first status written; later calls are ignored (sticky).
	pub fn write_status(&mut self, status: StatusCode) {
		if self.done {
			return;
		}
		self.status.get_or_insert(status);
	}

	/// The status that will be emitted (or was already emitted), defaulting
	/// to 200 until something else is recorded.
	pub fn status_code(&self) -> StatusCode {
		self.status.unwrap_or(StatusCode::OK)
	}

	pub fn headers_mut(&mut self) -> &mut HeaderMap {
		&mut self.headers
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Registers a header rewriter, applied in registration order exactly
	/// once when the response is finished.
	pub fn add_header_rewriter(&mut self, rewriter: impl HeaderRewriter + 'static) {
		self.rewriters.push(Box::new(rewriter));
	}

	/// Appends to the buffered body, synthesizing a 200 status on first call
	/// if none was set explicitly. No-op once `mark_done` has been called or
	/// the connection was hijacked.
	pub fn write(&mut self, data: impl Into<Bytes>) {
		if self.done || self.hijacked {
			return;
		}
		self.status.get_or_insert(StatusCode::OK);
		let data = data.into();
		self.bytes_written.fetch_add(data.len() as u64, Ordering::Relaxed);
		self.body_chunks.push(data);
	}

	/// Installs the upstream response body directly, bypassing the buffered
	/// chunk list. Bytes streamed through it still accumulate into this
	/// writer's byte counter for access-log fidelity.
	pub fn set_streaming_body(&mut self, body: ResponseBody) {
		if self.done || self.hijacked {
			return;
		}
		self.status.get_or_insert(StatusCode::OK);
		self.streaming_body = Some(CountingBody {
			inner: body,
			counter: self.bytes_written.clone(),
		}
		.boxed());
	}

	/// Marks the writer as having nothing further to emit. Idempotent; safe
	/// to call from multiple post-response observers.
	pub fn mark_done(&mut self) {
		self.done = true;
	}

	pub fn is_done(&self) -> bool {
		self.done
	}

	/// Non-consuming peek at the byte counter, for observers positioned
	/// mid-chain (Reporter, AccessLog) that run before `finish()` is called.
	pub fn bytes_written_so_far(&self) -> u64 {
		self.bytes_written.load(Ordering::Relaxed)
	}

	/// Takes over the underlying transport. Fails non-fatally if the
	/// transport does not support it, or it has already been taken.
	pub fn hijack(&mut self) -> Result<HijackedIo, HijackError> {
		if self.hijacked {
			return Err(HijackError::AlreadyHijacked);
		}
		let f = self.hijack_fn.take().ok_or(HijackError::Unsupported)?;
		let io = f()?;
		self.hijacked = true;
		Ok(io)
	}

	pub fn is_hijacked(&self) -> bool {
		self.hijacked
	}

	/// A channel that flips to `true` when the peer disconnects. When the
	/// connection driver never wires one up, this never fires.
	pub fn close_notify(&self) -> watch::Receiver<bool> {
		self.close_rx.clone()
	}

	/// Called by the connection driver on peer disconnect, if it knows how
	/// to detect one.
	pub fn notify_closed(&self) {
		let _ = self.close_tx.send(true);
	}

	/// Applies the registered rewriters, suppresses content-type
	/// auto-detection if nothing set one explicitly, and builds the final
	/// response together with a [`ResponseMeta`] for the access logger.
	pub fn finish(mut self) -> (Response<ResponseBody>, ResponseMeta) {
		let status = self.status.take().unwrap_or(StatusCode::OK);
		let mut headers = std::mem::take(&mut self.headers);
		for rewriter in &self.rewriters {
			rewriter.rewrite(&mut headers);
		}
		if !headers.contains_key(CONTENT_TYPE) {
			headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
		}

		let body = self.streaming_body.take().unwrap_or_else(|| {
			if self.body_chunks.is_empty() {
				empty_body()
			} else {
				let mut buf = Vec::new();
				for chunk in &self.body_chunks {
					buf.extend_from_slice(chunk);
				}
				Full::new(Bytes::from(buf))
					.map_err(|never: std::convert::Infallible| match never {})
					.boxed()
			}
		});

		let mut response = Response::new(body);
		*response.status_mut() = status;
		*response.headers_mut() = headers;

		let meta = ResponseMeta {
			bytes_written: self.bytes_written.clone(),
			status,
		};
		(response, meta)
	}
}

pin_project! {
	/// Wraps a response body to feed its frame sizes into the writer's byte
	/// counter, mirroring the teacher's `LogBody` pattern but counting bytes
	/// instead of watching gRPC trailers.
	struct CountingBody {
		#[pin]
		inner: ResponseBody,
		counter: Arc<AtomicU64>,
	}
}

impl Body for CountingBody {
	type Data = Bytes;
	type Error = BodyError;

	fn poll_frame(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
		let this = self.project();
		let result = std::task::ready!(this.inner.poll_frame(cx));
		if let Some(Ok(frame)) = &result {
			if let Some(data) = frame.data_ref() {
				this.counter.fetch_add(data.len() as u64, Ordering::Relaxed);
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
