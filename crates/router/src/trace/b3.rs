//! B3 propagation: multi-header (`X-B3-TraceId`, `X-B3-SpanId`,
//! `X-B3-ParentSpanId`, `X-B3-Sampled`, `X-B3-Flags`) and single-header
//! (`b3`) forms.

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::RngCore;

pub const B3_TRACE_ID: HeaderName = HeaderName::from_static("x-b3-traceid");
pub const B3_SPAN_ID: HeaderName = HeaderName::from_static("x-b3-spanid");
pub const B3_PARENT_SPAN_ID: HeaderName = HeaderName::from_static("x-b3-parentspanid");
pub const B3_SAMPLED: HeaderName = HeaderName::from_static("x-b3-sampled");
pub const B3_FLAGS: HeaderName = HeaderName::from_static("x-b3-flags");
pub const B3_SINGLE: HeaderName = HeaderName::from_static("b3");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B3Context {
	pub trace_id: String,
	pub span_id: String,
	pub parent_span_id: Option<String>,
	pub sampled: Option<bool>,
	pub debug: bool,
}

/// Parses inbound B3 headers, preferring the single-header form when both
/// are present (it is the more specific, explicit signal).
pub fn parse(headers: &HeaderMap) -> Option<B3Context> {
	if let Some(single) = headers.get(B3_SINGLE).and_then(|v| v.to_str().ok()) {
		if let Some(ctx) = parse_single(single) {
			return Some(ctx);
		}
	}
	parse_multi(headers)
}

fn parse_single(value: &str) -> Option<B3Context> {
	// Forms: {trace-id}-{span-id}, {trace-id}-{span-id}-{sampled},
	// {trace-id}-{span-id}-{sampled}-{parent-span-id}, or literal "0"/"1"/"d"
	// standalone sampling decisions (not usable without an existing context).
	if value == "0" || value == "1" || value == "d" {
		return None;
	}
	let parts: Vec<&str> = value.split('-').collect();
	if parts.len() < 2 {
		return None;
	}
	let trace_id = valid_hex(parts[0], &[16, 32])?;
	let span_id = valid_hex(parts[1], &[16])?;
	let (sampled, debug) = match parts.get(2) {
		Some(&"1") => (Some(true), false),
		Some(&"0") => (Some(false), false),
		Some(&"d") => (Some(true), true),
		_ => (None, false),
	};
	let parent_span_id = parts.get(3).and_then(|p| valid_hex(p, &[16]));
	Some(B3Context {
		trace_id,
		span_id,
		parent_span_id,
		sampled,
		debug,
	})
}

fn parse_multi(headers: &HeaderMap) -> Option<B3Context> {
	let trace_id = valid_hex(headers.get(B3_TRACE_ID)?.to_str().ok()?, &[16, 32])?;
	let span_id = valid_hex(headers.get(B3_SPAN_ID)?.to_str().ok()?, &[16])?;
	let parent_span_id = headers
		.get(B3_PARENT_SPAN_ID)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| valid_hex(v, &[16]));
	let sampled = headers
		.get(B3_SAMPLED)
		.and_then(|v| v.to_str().ok())
		.map(|v| v == "1" || v.eq_ignore_ascii_case("true"));
	let debug = headers
		.get(B3_FLAGS)
		.and_then(|v| v.to_str().ok())
		.map(|v| v == "1")
		.unwrap_or(false);
	Some(B3Context {
		trace_id,
		span_id,
		parent_span_id,
		sampled,
		debug,
	})
}

fn valid_hex(s: &str, allowed_lens: &[usize]) -> Option<String> {
	if !allowed_lens.contains(&s.len()) {
		return None;
	}
	if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
		return None;
	}
	Some(s.to_ascii_lowercase())
}

#[allow(dead_code)]
fn random_span_id() -> String {
	let mut bytes = [0u8; 8];
	rand::rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

/// Writes the outbound multi-header and single-header B3 forms from the
/// canonical `TraceInfo`, using `parent_span_id` as the `X-B3-ParentSpanId`
/// (the span id of the hop we received, if any).
pub fn write(headers: &mut HeaderMap, trace_id: &str, span_id: &str, parent_span_id: Option<&str>) {
	headers.insert(B3_TRACE_ID, HeaderValue::from_str(trace_id).unwrap());
	headers.insert(B3_SPAN_ID, HeaderValue::from_str(span_id).unwrap());
	if let Some(parent) = parent_span_id {
		headers.insert(
			B3_PARENT_SPAN_ID,
			HeaderValue::from_str(parent).unwrap(),
		);
	}
	headers.insert(B3_SAMPLED, HeaderValue::from_static("1"));

	let single = match parent_span_id {
		Some(parent) => format!("{trace_id}-{span_id}-1-{parent}"),
		None => format!("{trace_id}-{span_id}-1"),
	};
	headers.insert(B3_SINGLE, HeaderValue::from_str(&single).unwrap());
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_single_header_with_parent() {
		let v = "0123456789abcdef0123456789abcdef-0123456789abcdef-1-fedcba9876543210";
		let ctx = parse_single(v).unwrap();
		assert_eq!(ctx.trace_id, "0123456789abcdef0123456789abcdef");
		assert_eq!(ctx.span_id, "0123456789abcdef");
		assert_eq!(ctx.parent_span_id.as_deref(), Some("fedcba9876543210"));
		assert_eq!(ctx.sampled, Some(true));
	}

	#[test]
	fn standalone_sampling_decision_is_not_a_context() {
		assert!(parse_single("1").is_none());
	}

	#[test]
	fn parses_multi_header_form() {
		let mut headers = HeaderMap::new();
		headers.insert(B3_TRACE_ID, HeaderValue::from_static("0123456789abcdef"));
		headers.insert(B3_SPAN_ID, HeaderValue::from_static("fedcba9876543210"));
		headers.insert(B3_SAMPLED, HeaderValue::from_static("1"));
		let ctx = parse_multi(&headers).unwrap();
		assert_eq!(ctx.trace_id, "0123456789abcdef");
		assert_eq!(ctx.sampled, Some(true));
	}

	#[test]
	fn rejects_non_hex_trace_id() {
		let mut headers = HeaderMap::new();
		headers.insert(B3_TRACE_ID, HeaderValue::from_static("not-hex-at-all!!"));
		headers.insert(B3_SPAN_ID, HeaderValue::from_static("fedcba9876543210"));
		assert!(parse_multi(&headers).is_none());
	}

	#[test]
	fn write_emits_both_forms() {
		let mut headers = HeaderMap::new();
		write(&mut headers, "0123456789abcdef0123456789abcdef", "fedcba9876543210", None);
		assert_eq!(
			headers.get(B3_SINGLE).unwrap(),
			"0123456789abcdef0123456789abcdef-fedcba9876543210-1"
		);
		assert_eq!(headers.get(B3_TRACE_ID).unwrap(), "0123456789abcdef0123456789abcdef");
	}

	#[test]
	fn random_span_id_is_16_hex_chars() {
		let id = random_span_id();
		assert_eq!(id.len(), 16);
	}
}
