//! Admin HTTP surface (spec §6 ambient): readiness, liveness and the
//! Prometheus scrape endpoint. Grounded on the teacher's
//! `management::admin`/`management::metrics_server`, stripped of the
//! config-dump/pprof/log-level surface this spec has no equivalent for.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use router_core::drain::DrainWatcher;
use router_core::readiness::Ready;
use router_core::signal::ShutdownTrigger;

use crate::net::{self, Response, Server};

struct State {
	registry: Registry,
	ready: Ready,
	shutdown_trigger: ShutdownTrigger,
}

pub struct AdminService {
	s: Server<State>,
}

impl AdminService {
	pub async fn bind(
		addr: SocketAddr,
		registry: Registry,
		ready: Ready,
		shutdown_trigger: ShutdownTrigger,
		drain_rx: DrainWatcher,
	) -> anyhow::Result<Self> {
		Server::bind(
			"admin",
			addr,
			drain_rx,
			State {
				registry,
				ready,
				shutdown_trigger,
			},
		)
		.await
		.map(|s| AdminService { s })
	}

	pub fn address(&self) -> SocketAddr {
		self.s.address()
	}

	pub fn spawn(self) {
		self.s.spawn(|state, req| async move {
			Ok(match req.uri().path() {
				"/healthz" => net::plaintext_response(http::StatusCode::OK, "ok\n".to_string()),
				"/readyz" => handle_readyz(&state.ready),
				"/metrics" => handle_metrics(&state.registry),
				"/quitquitquit" => handle_shutdown(&state.shutdown_trigger, &req).await,
				_ => net::empty_response(http::StatusCode::NOT_FOUND),
			})
		})
	}
}

fn handle_readyz(ready: &Ready) -> Response {
	let pending = ready.pending();
	if pending.is_empty() {
		net::plaintext_response(http::StatusCode::OK, "ready\n".to_string())
	} else {
		net::plaintext_response(
			http::StatusCode::SERVICE_UNAVAILABLE,
			format!("waiting on: {}\n", pending.into_iter().collect::<Vec<_>>().join(", ")),
		)
	}
}

fn handle_metrics(registry: &Registry) -> Response {
	let mut buf = String::new();
	if let Err(err) = encode(&mut buf, registry) {
		return net::plaintext_response(http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
	}
	http::Response::builder()
		.status(http::StatusCode::OK)
		.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(crate::response_writer::simple_body(buf))
		.expect("builder with known status code should not fail")
}

async fn handle_shutdown(trigger: &ShutdownTrigger, req: &http::Request<Incoming>) -> Response {
	if req.method() != http::Method::POST {
		return net::empty_response(http::StatusCode::METHOD_NOT_ALLOWED);
	}
	trigger.shutdown_now().await;
	net::plaintext_response(http::StatusCode::OK, "shutdown requested\n".to_string())
}
