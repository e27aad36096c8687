//! Per-request shared state (`RequestInfo`), owned by exactly one task for
//! the lifetime of a request and mutated in turn by each pipeline stage.

use std::sync::Arc;
use std::time::Instant;

use http::{HeaderMap, Uri};

use crate::registry::{Endpoint, EndpointPool};
use crate::trace::TraceInfo;

/// Allocated by the first pipeline stage at connection entry, read by the
/// access logger at pipeline exit. See spec §3.
#[derive(Debug)]
pub struct RequestInfo {
	pub received_at: Instant,
	pub app_request_started_at: Option<Instant>,
	pub app_request_finished_at: Option<Instant>,
	pub finished_at: Option<Instant>,

	/// Non-owning reference to the resolved route's pool; outlives any
	/// single request.
	pub route_pool: Option<Arc<EndpointPool>>,
	/// The single endpoint selected for dispatch; nil on early failures.
	pub route_endpoint: Option<Arc<Endpoint>>,
	/// Parsed URL of the detour destination, when this request is being
	/// redirected through a route service.
	pub route_service_url: Option<Uri>,
	/// True when the route service's own host resolves in the local
	/// registry, short-circuiting out-of-process dispatch.
	pub should_route_to_internal_route_service: bool,

	/// Snapshot of headers actually sent upstream, captured after mutation,
	/// for access-log fidelity.
	pub backend_req_headers: Option<HeaderMap>,

	pub trace: TraceInfo,

	pub failed_attempts: u32,
	pub round_trip_successful: bool,
}

impl RequestInfo {
	pub fn new(trace: TraceInfo) -> Self {
		RequestInfo {
			received_at: Instant::now(),
			app_request_started_at: None,
			app_request_finished_at: None,
			finished_at: None,
			route_pool: None,
			route_endpoint: None,
			route_service_url: None,
			should_route_to_internal_route_service: false,
			backend_req_headers: None,
			trace,
			failed_attempts: 0,
			round_trip_successful: false,
		}
	}

	pub fn mark_app_request_started(&mut self) {
		self.app_request_started_at = Some(Instant::now());
	}

	pub fn mark_app_request_finished(&mut self) {
		self.app_request_finished_at = Some(Instant::now());
	}

	pub fn mark_finished(&mut self) {
		self.finished_at = Some(Instant::now());
	}

	/// `AppRequestFinishedAt - ReceivedAt`, used by the Reporter (§4.13).
	/// Only meaningful once an endpoint was selected and dispatch completed.
	pub fn app_request_duration(&self) -> Option<std::time::Duration> {
		self
			.app_request_finished_at
			.map(|finished| finished.saturating_duration_since(self.received_at))
	}
}
