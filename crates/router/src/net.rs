//! Generic HTTP/1 server scaffolding for the admin endpoint (spec §6
//! ambient). Grounded on the teacher's
//! `management::hyper_helpers::Server<S>`: bind up front, then race each
//! connection's `serve_connection` future against the drain signal,
//! switching it into graceful shutdown rather than dropping it outright.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use router_core::drain::DrainWatcher;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::info;

use crate::response_writer::ResponseBody;

pub type Response = http::Response<ResponseBody>;

pub fn http1_server() -> hyper::server::conn::http1::Builder {
	let mut b = hyper::server::conn::http1::Builder::new();
	b.timer(TokioTimer::new());
	b
}

pub fn http2_server() -> hyper::server::conn::http2::Builder<TokioExecutor> {
	let mut b = hyper::server::conn::http2::Builder::new(TokioExecutor::new());
	b.timer(TokioTimer::new());
	b
}

pub fn empty_response(status: http::StatusCode) -> Response {
	http::Response::builder()
		.status(status)
		.body(crate::response_writer::simple_body(String::new()))
		.expect("builder with known status code should not fail")
}

pub fn plaintext_response(status: http::StatusCode, body: String) -> Response {
	http::Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "text/plain")
		.body(crate::response_writer::simple_body(body))
		.expect("builder with known status code should not fail")
}

/// A bound, not-yet-serving listener carrying arbitrary per-connection
/// state `S`, handed to the request handler behind an `Arc`.
pub struct Server<S> {
	name: String,
	bind: TcpListener,
	drain_rx: DrainWatcher,
	state: S,
}

impl<S> Server<S> {
	pub async fn bind(name: &str, addr: SocketAddr, drain_rx: DrainWatcher, state: S) -> anyhow::Result<Self> {
		let bind = TcpListener::bind(addr).await?;
		Ok(Server {
			name: name.to_string(),
			bind,
			drain_rx,
			state,
		})
	}

	pub fn address(&self) -> SocketAddr {
		self.bind.local_addr().expect("local address must be ready")
	}

	pub fn state_mut(&mut self) -> &mut S {
		&mut self.state
	}

	/// Serves `handler` on this listener until the drain signal fires, then
	/// lets each in-flight connection finish its current request before
	/// closing.
	pub fn spawn<F, R>(self, handler: F)
	where
		S: Send + Sync + 'static,
		F: Fn(Arc<S>, http::Request<Incoming>) -> R + Send + Sync + 'static,
		R: Future<Output = Result<Response, anyhow::Error>> + Send + 'static,
	{
		let address = self.address();
		let name = self.name;
		let drain = self.drain_rx;
		let state = Arc::new(self.state);
		let handler = Arc::new(handler);
		info!(%address, component = %name, "listener established");

		tokio::spawn(async move {
			let stream = TcpListenerStream::new(self.bind);
			let mut stream = stream.take_until(Box::pin(drain.clone().wait_for_drain()));
			while let Some(Ok(socket)) = stream.next().await {
				let _ = socket.set_nodelay(true);
				let drain = drain.clone();
				let state = state.clone();
				let handler = handler.clone();
				tokio::spawn(async move {
					let serve = http1_server().serve_connection(
						TokioIo::new(socket),
						hyper::service::service_fn(move |req| {
							let state = state.clone();
							let handler = handler.clone();
							async move {
								match handler(state, req).await {
									Ok(resp) => Ok::<_, std::convert::Infallible>(resp),
									Err(err) => Ok(crate::net::plaintext_response(
										http::StatusCode::INTERNAL_SERVER_ERROR,
										err.to_string(),
									)),
								}
							}
						}),
					);
					match futures_util::future::select(Box::pin(drain.wait_for_drain()), serve).await {
						futures_util::future::Either::Left((_shutdown, mut serve)) => {
							std::pin::Pin::new(&mut serve).graceful_shutdown();
							let _ = serve.await;
						},
						futures_util::future::Either::Right((serve, _shutdown)) => {
							let _ = serve;
						},
					}
				});
			}
			info!(%address, component = %name, "listener drained");
		});
	}
}
