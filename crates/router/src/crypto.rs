//! Route-service signing/verification. The payload `{RequestedTime,
//! ForwardedURL}` is encrypted-then-authenticated under ChaCha20-Poly1305
//! (AEAD), in the same dependency family as the teacher's rustls/rcgen TLS
//! stack.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
	/// Unix seconds when the signature was created.
	pub requested_time: i64,
	pub forwarded_url: String,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
	#[error("signature payload could not be decoded")]
	Malformed,
	#[error("signature failed AEAD authentication under all configured keys")]
	BadMac,
	#[error("signature is outside the configured skew window")]
	Expired,
}

/// A 256-bit ChaCha20-Poly1305 key, as raw bytes (no `Debug`/`Display` to
/// avoid ever leaking it into a log line).
#[derive(Clone)]
pub struct RouteServiceKey(Key);

impl RouteServiceKey {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		RouteServiceKey(Key::from(bytes))
	}
}

/// AEAD collaborator: signs with the active key, verifies trying active
/// then previous — a standard two-key rotation window.
pub struct RouteServiceCrypto {
	active: RouteServiceKey,
	previous: Option<RouteServiceKey>,
	skew: Duration,
}

impl RouteServiceCrypto {
	pub fn new(active: RouteServiceKey, previous: Option<RouteServiceKey>, skew: Duration) -> Self {
		RouteServiceCrypto {
			active,
			previous,
			skew,
		}
	}

	/// Encrypts `sig` under the active key, returning `(base64 ciphertext,
	/// base64 nonce)` as the router emits them in the `X-CF-Route-Service-
	/// Signature` / `-Metadata` headers.
	pub fn seal(&self, sig: &Signature) -> Result<(String, String), VerifyError> {
		let plaintext = serde_json::to_vec(sig).map_err(|_| VerifyError::Malformed)?;
		let mut nonce_bytes = [0u8; 12];
		rand::rng().fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from(nonce_bytes);
		let cipher = ChaCha20Poly1305::new(&self.active.0);
		let ciphertext = cipher
			.encrypt(&nonce, plaintext.as_ref())
			.map_err(|_| VerifyError::Malformed)?;
		Ok((
			BASE64.encode(ciphertext),
			BASE64.encode(nonce_bytes),
		))
	}

	/// Verifies and decodes a `(signature, metadata)` header pair, trying the
	/// active key then the previous key, and bounds
	/// `RequestedTime` freshness against `now` (step 4b).
	pub fn open(&self, signature_b64: &str, metadata_b64: &str, now: SystemTime) -> Result<Signature, VerifyError> {
		let ciphertext = BASE64.decode(signature_b64).map_err(|_| VerifyError::Malformed)?;
		let nonce_bytes: [u8; 12] = BASE64
			.decode(metadata_b64)
			.map_err(|_| VerifyError::Malformed)?
			.try_into()
			.map_err(|_| VerifyError::Malformed)?;
		let nonce = Nonce::from(nonce_bytes);

		let plaintext = self
			.try_open_with(&self.active.0, &nonce, &ciphertext)
			.or_else(|| {
				self
					.previous
					.as_ref()
					.and_then(|k| self.try_open_with(&k.0, &nonce, &ciphertext))
			})
			.ok_or(VerifyError::BadMac)?;

		let sig: Signature = serde_json::from_slice(&plaintext).map_err(|_| VerifyError::Malformed)?;

		let now_secs = now
			.duration_since(UNIX_EPOCH)
			.map_err(|_| VerifyError::Malformed)?
			.as_secs() as i64;
		let delta = (now_secs - sig.requested_time).unsigned_abs();
		if delta > self.skew.as_secs() {
			return Err(VerifyError::Expired);
		}
		Ok(sig)
	}

	fn try_open_with(&self, key: &Key, nonce: &Nonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
		ChaCha20Poly1305::new(key).decrypt(nonce, ciphertext).ok()
	}
}

impl Signature {
	pub fn new(now: SystemTime, forwarded_url: impl Into<String>) -> Self {
		Signature {
			requested_time: now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64,
			forwarded_url: forwarded_url.into(),
		}
	}
}
