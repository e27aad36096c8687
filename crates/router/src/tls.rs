//! TLS termination for the client-facing listeners, grounded on the
//! teacher's `transport::tls` (a `rustls::ServerConfig` built once at
//! startup, `tokio_rustls::TlsAcceptor::accept` per connection), trimmed to
//! the server-side-only, no-mTLS-trust-store-reload subset this proxy
//! needs.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::Context;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::CertificateDer;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsListenerConfig;
use crate::pipeline::TlsConnectionInfo;

fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
	let file = File::open(path).with_context(|| format!("opening TLS cert file {path}"))?;
	let certs = rustls_pemfile::certs(&mut BufReader::new(file)).collect::<Result<Vec<_>, _>>()?;
	Ok(certs)
}

fn load_key(path: &str) -> anyhow::Result<rustls_pki_types::PrivateKeyDer<'static>> {
	let file = File::open(path).with_context(|| format!("opening TLS key file {path}"))?;
	rustls_pemfile::private_key(&mut BufReader::new(file))?.context("no private key found in TLS key file")
}

/// Builds the `ServerConfig` once at startup from `cfg`. When
/// `client_ca_path` is set, client certificates are accepted (and required,
/// if `require_client_cert`); presented certificates are threaded through
/// to the pipeline as [`TlsConnectionInfo`].
pub fn server_config(cfg: &TlsListenerConfig) -> anyhow::Result<Arc<ServerConfig>> {
	let certs = load_certs(&cfg.cert_path)?;
	let key = load_key(&cfg.key_path)?;

	let builder = ServerConfig::builder();
	let config = if let Some(ca_path) = &cfg.client_ca_path {
		let mut roots = RootCertStore::empty();
		for cert in load_certs(ca_path)? {
			roots.add(cert)?;
		}
		let verifier = if cfg.require_client_cert {
			WebPkiClientVerifier::builder(Arc::new(roots)).build()?
		} else {
			WebPkiClientVerifier::builder(Arc::new(roots)).allow_unauthenticated().build()?
		};
		builder.with_client_cert_verifier(verifier).with_single_cert(certs, key)?
	} else {
		builder.with_no_client_auth().with_single_cert(certs, key)?
	};

	Ok(Arc::new(config))
}

pub fn acceptor(cfg: &TlsListenerConfig) -> anyhow::Result<TlsAcceptor> {
	Ok(TlsAcceptor::from(server_config(cfg)?))
}

/// Extracts the leaf peer certificate (DER-encoded), if the client
/// presented one, for `TlsConnectionInfo`.
pub fn connection_info<IO>(conn: &tokio_rustls::server::TlsStream<IO>) -> TlsConnectionInfo {
	let (_, session) = conn.get_ref();
	let peer_certificate_der = session
		.peer_certificates()
		.and_then(|certs| certs.first())
		.map(|cert| cert.as_ref().to_vec());
	TlsConnectionInfo { peer_certificate_der }
}
