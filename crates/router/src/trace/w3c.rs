//! W3C Trace Context: `traceparent` and `tracestate`.

use http::{HeaderMap, HeaderName, HeaderValue};

pub const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");
pub const TRACESTATE: HeaderName = HeaderName::from_static("tracestate");

/// Input `tracestate` headers beyond this many bytes are dropped entirely —
/// older entries beyond the budget.
pub const TRACESTATE_MAX_BYTES: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traceparent {
	pub version: u8,
	pub trace_id: [u8; 16],
	pub parent_id: [u8; 8],
	pub flags: u8,
}

impl Traceparent {
	pub fn trace_id_hex(&self) -> String {
		hex::encode(self.trace_id)
	}

	pub fn parent_id_hex(&self) -> String {
		hex::encode(self.parent_id)
	}

	/// `version-traceid-parentid-flags`, hex, fixed width.
	pub fn to_header_value(&self) -> String {
		format!(
			"{:02x}-{}-{}-{:02x}",
			self.version,
			self.trace_id_hex(),
			self.parent_id_hex(),
			self.flags
		)
	}
}

/// Parses a `traceparent` header value. Rejects malformed values (wrong
/// segment widths, non-hex, all-zero trace/parent ids) rather than
/// panicking — callers treat a `None` the same as an absent header.
pub fn parse_traceparent(value: &str) -> Option<Traceparent> {
	let mut parts = value.split('-');
	let version = parts.next()?;
	let trace_id = parts.next()?;
	let parent_id = parts.next()?;
	let flags = parts.next()?;
	if parts.next().is_some() {
		return None;
	}
	if version.len() != 2 || trace_id.len() != 32 || parent_id.len() != 16 || flags.len() != 2 {
		return None;
	}
	let version = u8::from_str_radix(version, 16).ok()?;
	if version == 0xff {
		return None;
	}
	let trace_id: [u8; 16] = hex::decode(trace_id).ok()?.try_into().ok()?;
	let parent_id: [u8; 8] = hex::decode(parent_id).ok()?.try_into().ok()?;
	let flags = u8::from_str_radix(flags, 16).ok()?;
	if trace_id == [0u8; 16] || parent_id == [0u8; 8] {
		return None;
	}
	Some(Traceparent {
		version,
		trace_id,
		parent_id,
		flags,
	})
}

pub fn parse(headers: &HeaderMap) -> Option<Traceparent> {
	headers
		.get(TRACEPARENT)
		.and_then(|v| v.to_str().ok())
		.and_then(parse_traceparent)
}

/// One `key=value` entry in a `tracestate` header. Order is meaningful:
/// newest entry first on emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracestateEntry {
	pub key: String,
	pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tracestate(pub Vec<TracestateEntry>);

/// Parses an inbound `tracestate` header. Input beyond
/// [`TRACESTATE_MAX_BYTES`] is truncated before splitting on commas, so
/// entries past that budget are silently dropped.
pub fn parse_tracestate(value: &str) -> Tracestate {
	let truncated = if value.len() > TRACESTATE_MAX_BYTES {
		&value[..TRACESTATE_MAX_BYTES]
	} else {
		value
	};
	let entries = truncated
		.split(',')
		.filter_map(|member| {
			let member = member.trim();
			let (k, v) = member.split_once('=')?;
			if k.is_empty() {
				return None;
			}
			Some(TracestateEntry {
				key: k.trim().to_string(),
				value: v.trim().to_string(),
			})
		})
		.collect();
	Tracestate(entries)
}

/// Removes any existing entry keyed `vendor_key` (or `tenant@vendor_key`)
/// and prepends a fresh one — new entry first
pub fn with_vendor_entry(mut state: Tracestate, vendor_key: &str, value: &str) -> Tracestate {
	state.0.retain(|e| e.key != vendor_key);
	state.0.insert(
		0,
		TracestateEntry {
			key: vendor_key.to_string(),
			value: value.to_string(),
		},
	);
	state
}

impl Tracestate {
	pub fn to_header_value(&self) -> String {
		self
			.0
			.iter()
			.map(|e| format!("{}={}", e.key, e.value))
			.collect::<Vec<_>>()
			.join(",")
	}
}

/// Builds the router's own vendor key, `tenant@vendor` when a tenant id is
/// configured, else bare `vendor`.
pub fn vendor_key(vendor: &str, tenant: Option<&str>) -> String {
	match tenant {
		Some(tenant) if !tenant.is_empty() => format!("{tenant}@{vendor}"),
		_ => vendor.to_string(),
	}
}

pub fn write(headers: &mut HeaderMap, traceparent: &Traceparent, tracestate: &Tracestate) {
	headers.insert(
		TRACEPARENT,
		HeaderValue::from_str(&traceparent.to_header_value()).unwrap(),
	);
	if !tracestate.0.is_empty() {
		if let Ok(v) = HeaderValue::from_str(&tracestate.to_header_value()) {
			headers.insert(TRACESTATE, v);
		}
	} else {
		headers.remove(TRACESTATE);
	}
}
