//! Distributed-tracing identifier handling: B3 (multi and single-header
//! forms) and W3C `traceparent`/`tracestate`, unified under one
//! [`TraceInfo`] so `X-Vcap-Request-Id`, B3 and W3C headers are always
//! coherent with each other.

pub mod b3;
pub mod w3c;

use rand::RngCore;
use uuid::Uuid;

/// Canonical per-request identifiers. `trace_id` is a 128-bit hex string,
/// `span_id` a 64-bit hex string; `uuid` is the RFC-4122 dashed form of the
/// same 128 bits when the trace id was generated locally, or an
/// independently generated UUID when it was supplied by a peer and isn't
/// decodable as 16 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
	pub trace_id: String,
	pub span_id: String,
	pub uuid: Uuid,
}

impl TraceInfo {
	/// Generates a fresh 128-bit trace id and 64-bit span id, with the UUID
	/// derived byte-exact from the trace id.
	pub fn generate() -> Self {
		let mut trace_bytes = [0u8; 16];
		rand::rng().fill_bytes(&mut trace_bytes);
		let mut span_bytes = [0u8; 8];
		rand::rng().fill_bytes(&mut span_bytes);
		TraceInfo {
			trace_id: hex::encode(trace_bytes),
			span_id: hex::encode(span_bytes),
			uuid: Uuid::from_bytes(trace_bytes),
		}
	}

	/// Reuses a peer-supplied trace id, generating only a fresh span id for
	/// the outbound hop (rule: "reuse their trace identifier;
	/// derive a fresh span/parent id for the outbound hop").
	pub fn from_peer_trace_id(trace_id: &str) -> Self {
		let mut span_bytes = [0u8; 8];
		rand::rng().fill_bytes(&mut span_bytes);
		let span_id = hex::encode(span_bytes);
		let uuid = decode_trace_id_bytes(trace_id)
			.map(Uuid::from_bytes)
			.unwrap_or_else(Uuid::new_v4);
		TraceInfo {
			trace_id: trace_id.to_ascii_lowercase(),
			span_id,
			uuid,
		}
	}

	/// `X-Vcap-Request-Id` value: `TraceID + "-" + SpanID`.
	pub fn vcap_request_id(&self) -> String {
		format!("{}-{}", self.trace_id, self.span_id)
	}
}

fn decode_trace_id_bytes(trace_id: &str) -> Option<[u8; 16]> {
	let bytes = hex::decode(trace_id).ok()?;
	bytes.try_into().ok()
}

/// Widens a trace id to the 16-byte form W3C `traceparent` requires: a
/// 16-hex-char (B3-style 64-bit) id is zero-extended on the left; a
/// 32-hex-char id is used as-is; anything else falls back to a fresh
/// 128-bit value rather than emit a malformed header.
pub fn trace_id_to_bytes16(trace_id: &str) -> [u8; 16] {
	if let Some(bytes) = decode_trace_id_bytes(trace_id) {
		return bytes;
	}
	if trace_id.len() == 16 {
		if let Ok(low) = hex::decode(trace_id) {
			let mut out = [0u8; 16];
			out[8..].copy_from_slice(&low);
			return out;
		}
	}
	let mut out = [0u8; 16];
	rand::rng().fill_bytes(&mut out);
	out
}

/// Decodes a hex span id to its 8-byte form, falling back to a fresh value
/// if the string isn't valid hex of the right width.
pub fn span_id_to_bytes8(span_id: &str) -> [u8; 8] {
	hex::decode(span_id)
		.ok()
		.and_then(|b| b.try_into().ok())
		.unwrap_or_else(|| {
			let mut out = [0u8; 8];
			rand::rng().fill_bytes(&mut out);
			out
		})
}
