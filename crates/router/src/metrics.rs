//! Reporter/metrics collaborator (spec §4.13, §6): counters and histograms
//! named by the Reporter and MaxRequestSize stages, built on
//! `prometheus-client`'s `Family<Labels, Counter/Histogram>`, matching the
//! teacher's `telemetry::metrics::Metrics` pattern.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum RouterErrorTag {
	None,
	Tag(String),
}

impl Default for RouterErrorTag {
	fn default() -> Self {
		RouterErrorTag::None
	}
}

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct ResponseLabels {
	pub status: u32,
	pub router_error: RouterErrorTag,
}

#[derive(Clone, Hash, Default, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct EmptyLabels {}

/// Every counter/histogram the pipeline emits, registered once at startup
/// and shared behind an `Arc` with every request task.
#[derive(Debug)]
pub struct Metrics {
	/// Routing-response status, keyed by the (status, router-error) pair
	/// recorded by the Reporter (§4.13).
	pub routing_responses: Family<ResponseLabels, Counter>,
	/// Latency between `ReceivedAt` and `AppRequestFinishedAt`, recorded by
	/// the Reporter only when an endpoint was selected and dispatch
	/// completed.
	pub routing_response_latency_seconds: Histogram,
	/// Incremented by Lookup when a resolved pool is overloaded (§4.10 step
	/// 7, "backend exhausted").
	pub backend_exhausted: Family<EmptyLabels, Counter>,
	/// Incremented by the Reporter when an inbound `Content-Length` header's
	/// single value is empty after trimming (§4.13).
	pub empty_content_length: Family<EmptyLabels, Counter>,
	/// "request start/stop" telemetry envelope (§2 item 8).
	pub requests_started: Family<EmptyLabels, Counter>,
	pub requests_stopped: Family<EmptyLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let routing_responses = Family::default();
		registry.register(
			"routing_responses",
			"Routing responses by status and router-error tag",
			routing_responses.clone(),
		);

		let routing_response_latency_seconds =
			Histogram::new(prometheus_client::metrics::histogram::exponential_buckets(0.001, 2.0, 16));
		registry.register(
			"routing_response_latency_seconds",
			"Latency between request arrival and upstream response completion",
			routing_response_latency_seconds.clone(),
		);

		let backend_exhausted = Family::default();
		registry.register(
			"backend_exhausted",
			"Requests rejected because every endpoint in the pool was at its connection cap",
			backend_exhausted.clone(),
		);

		let empty_content_length = Family::default();
		registry.register(
			"empty_content_length",
			"Requests whose Content-Length header's single value was empty after trimming",
			empty_content_length.clone(),
		);

		let requests_started = Family::default();
		registry.register("requests_started", "Request start envelopes emitted", requests_started.clone());

		let requests_stopped = Family::default();
		registry.register("requests_stopped", "Request stop envelopes emitted", requests_stopped.clone());

		Metrics {
			routing_responses,
			routing_response_latency_seconds,
			backend_exhausted,
			empty_content_length,
			requests_started,
			requests_stopped,
		}
	}
}
