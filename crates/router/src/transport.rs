//! The backend transport collaborator (spec §6): dial, connection pooling,
//! retry/backoff and TLS are explicitly out of scope — this module provides
//! just enough of a real implementation (a thin `hyper_util` client) to
//! exercise the pipeline end to end, plus the typed error surface the error
//! classifier (§7) maps onto the response taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use axum_core::body::Body;
use http::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::errors::UpstreamTlsError;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
	#[error("tls: {0}")]
	Tls(UpstreamTlsError),
	#[error("dial/read/write error: {0}")]
	Io(String),
	#[error("response header not received within the configured timeout")]
	Timeout,
}

impl TransportError {
	/// Best-effort classification into retriable vs. terminal, performed by
	/// the transport collaborator before surfacing to the error handler
	/// (spec §7 `UpstreamTransport`).
	pub fn is_retriable(&self) -> bool {
		matches!(self, TransportError::Io(_))
	}
}

/// The backend transport collaborator: hands a fully-formed upstream
/// request to the network and returns its response or a typed error.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, TransportError>;
}

/// Minimal `hyper_util`-backed implementation. Connection pooling beyond
/// what `hyper_util::client::legacy::Client` does internally, retry/backoff
/// loops, and TLS dial are all out of scope (spec §1) — this exists so the
/// binary actually proxies traffic.
pub struct HyperTransport {
	client: Client<HttpConnector, Body>,
	read_timeout: Duration,
}

impl HyperTransport {
	pub fn new(read_timeout: Duration) -> Self {
		let mut connector = HttpConnector::new();
		connector.set_nodelay(true);
		let client = Client::builder(TokioExecutor::new()).build(connector);
		HyperTransport {
			client,
			read_timeout,
		}
	}
}

#[async_trait]
impl Transport for HyperTransport {
	async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, TransportError> {
		match tokio::time::timeout(self.read_timeout, self.client.request(req)).await {
			Ok(Ok(resp)) => Ok(resp.map(Body::new)),
			Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
			Err(_) => Err(TransportError::Timeout),
		}
	}
}
