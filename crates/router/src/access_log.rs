//! The access logger collaborator (spec §1, §6): formatting and shipping
//! are out of scope, but the workspace needs a record shape and a sink so
//! requests produce something observable end to end. Simplified from the
//! teacher's `telemetry::log::RequestLog`, dropping its CEL expression
//! engine — this spec has no request-time transformation language.

use std::net::SocketAddr;
use std::time::Duration;

use http::HeaderMap;
use serde::Serialize;

use crate::registry::Endpoint;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct AccessLogRecord {
	pub remote_addr: SocketAddr,
	pub host: String,
	pub method: String,
	pub uri: String,
	pub status: u16,
	pub router_error: Option<&'static str>,
	pub request_bytes_read: u64,
	pub response_bytes_written: u64,
	pub duration: Duration,
	pub app_request_duration: Option<Duration>,
	pub endpoint_addr: Option<String>,
	pub application_id: Option<String>,
	pub trace_id: String,
	pub span_id: String,
	#[serde(skip)]
	pub backend_req_headers: Option<HeaderMap>,
}

impl AccessLogRecord {
	pub fn endpoint_addr_of(endpoint: Option<&Arc<Endpoint>>) -> Option<String> {
		endpoint.map(|e| e.canonical_addr())
	}
}

/// Fire-and-forget sink (spec §6 `AccessLogger.Log(record)`).
pub trait AccessLogger: Send + Sync {
	fn log(&self, record: AccessLogRecord);
}

/// Emits each record as a single structured log line, following the
/// teacher's preference for `tracing`-based JSON output over a bespoke
/// formatter.
pub struct StdoutLogger;

impl AccessLogger for StdoutLogger {
	fn log(&self, record: AccessLogRecord) {
		tracing::info!(
			target: "access_log",
			remote_addr = %record.remote_addr,
			host = %record.host,
			method = %record.method,
			uri = %record.uri,
			status = record.status,
			router_error = record.router_error.unwrap_or(""),
			request_bytes_read = record.request_bytes_read,
			response_bytes_written = record.response_bytes_written,
			duration_ms = record.duration.as_millis() as u64,
			endpoint_addr = record.endpoint_addr.as_deref().unwrap_or(""),
			application_id = record.application_id.as_deref().unwrap_or(""),
			trace_id = %record.trace_id,
			span_id = %record.span_id,
			"access log"
		);
	}
}

/// A test double recording every entry it receives in order.
#[derive(Default, Clone)]
pub struct RecordingLogger(pub Arc<std::sync::Mutex<Vec<AccessLogRecord>>>);

impl AccessLogger for RecordingLogger {
	fn log(&self, record: AccessLogRecord) {
		self.0.lock().unwrap().push(record);
	}
}

/// A counting body reader installed at pipeline entry (§2 item 6): counts
/// bytes read from the inbound request body for access-log fidelity,
/// independent of what the upstream transport itself observes.
#[derive(Debug, Default, Clone)]
pub struct RequestByteCounter(std::sync::Arc<std::sync::atomic::AtomicU64>);

impl RequestByteCounter {
	pub fn add(&self, n: u64) {
		self.0.fetch_add(n, std::sync::atomic::Ordering::Relaxed);
	}

	pub fn get(&self) -> u64 {
		self.0.load(std::sync::atomic::Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recording_logger_captures_entries_in_order() {
		let logger = RecordingLogger::default();
		let make = |status: u16| AccessLogRecord {
			remote_addr: "127.0.0.1:1".parse().unwrap(),
			host: "example.com".into(),
			method: "GET".into(),
			uri: "/".into(),
			status,
			router_error: None,
			request_bytes_read: 0,
			response_bytes_written: 0,
			duration: Duration::from_millis(1),
			app_request_duration: None,
			endpoint_addr: None,
			application_id: None,
			trace_id: "t".into(),
			span_id: "s".into(),
			backend_req_headers: None,
		};
		logger.log(make(200));
		logger.log(make(404));
		let entries = logger.0.lock().unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].status, 200);
		assert_eq!(entries[1].status, 404);
	}

	#[test]
	fn byte_counter_accumulates() {
		let c = RequestByteCounter::default();
		c.add(5);
		c.add(3);
		assert_eq!(c.get(), 8);
	}
}
