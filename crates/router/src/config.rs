//! Operator policy flags, loaded once at startup and handed to the
//! pipeline via `Arc<RouterConfig>`. YAML/env based, following the
//! teacher's `config.rs` pattern of a single `serde`-deserializable struct
//! with `Default` impls for every field.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::LoadBalancePolicy;

/// How the pipeline should respond when a resolved pool is present but has
/// no live endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPoolResponsePolicy {
	/// 503 "no available endpoints".
	#[default]
	NoEndpoints,
	/// Reuse the 404 "does not exist" path, as if the route were unknown.
	UnknownRoute,
}

/// `ClientCertSanitizer` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForwardedClientCertMode {
	AlwaysForward,
	#[default]
	Forward,
	SanitizeSet,
}

fn default_max_header_bytes() -> usize {
	1024 * 1024
}

fn default_signature_expiry() -> Duration {
	Duration::from_secs(15)
}

fn default_true() -> bool {
	true
}

/// TLS termination for the client-facing listeners. Optional: when absent
/// the router speaks plaintext HTTP and `TlsConnectionInfo` is always
/// `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsListenerConfig {
	pub cert_path: String,
	pub key_path: String,
	/// Trust anchor for client certificates. When set, clients may present
	/// a certificate, which the ClientCertSanitizer stage (§4.8) then
	/// forwards/sanitizes per `forwarded_client_cert_mode`.
	pub client_ca_path: Option<String>,
	/// When true, the TLS handshake fails if the client presents no
	/// certificate. Requires `client_ca_path`.
	#[serde(default)]
	pub require_client_cert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
	/// Listener addresses for client-facing HTTP traffic.
	pub listen_addrs: Vec<SocketAddr>,
	/// Admin/metrics/readiness bind address.
	pub admin_addr: SocketAddr,
	/// TLS termination for `listen_addrs`, if any.
	pub tls: Option<TlsListenerConfig>,

	/// Clamped to `[1, 1 MiB]` at load time.
	#[serde(default = "default_max_header_bytes")]
	pub max_request_header_bytes: usize,

	/// Whether HTTP/2 negotiation is offered to clients.
	pub enable_http2: bool,

	/// No live endpoints are available in the resolved pool.
	pub empty_pool_response_policy: EmptyPoolResponsePolicy,

	/// Header names eligible for stripping when
	/// named by a client's `Connection` header.
	pub hop_by_hop_filter_allowlist: HashSet<String>,

	/// Client-certificate forwarding mode.
	pub forwarded_client_cert_mode: ForwardedClientCertMode,

	/// Response headers added only when absent.
	pub response_add_headers_if_not_present: Vec<(String, String)>,
	/// Response headers always removed.
	pub response_remove_headers: Vec<String>,
	/// Framework-supplied always-remove list (e.g. confidential upstream
	/// debug headers), appended to `response_remove_headers`.
	pub framework_always_remove_headers: Vec<String>,

	/// Route-service detour policy.
	pub route_service_enabled: bool,
	pub route_service_recommend_https: bool,
	pub route_service_hairpinning: bool,
	#[serde(default = "default_signature_expiry")]
	pub route_service_signature_expiry: Duration,
	/// Base64-encoded 256-bit active signing key; `None` has the process
	/// generate an ephemeral one at startup (fine when route services are
	/// disabled, but signatures won't survive a restart).
	pub route_service_active_key: Option<String>,
	pub route_service_previous_key: Option<String>,

	/// Endpoint iterator / load-balancing controls.
	pub load_balance_policy: LoadBalancePolicy,
	pub sticky_session_cookie_names: Vec<String>,
	pub local_zone: Option<String>,
	pub max_conns_per_backend: usize,

	/// W3C tracestate vendor/tenant id.
	pub trace_vendor_id: String,
	pub trace_tenant_id: Option<String>,

	/// Backend round-trip timeout.
	pub backend_read_timeout: Duration,

	/// User-Agent value that identifies a request as a load-balancer
	/// healthcheck, bypassing the normal routing pipeline.
	pub healthcheck_user_agent: String,

	/// Whether query strings containing `;` should be tagged as deprecated.
	#[serde(default = "default_true")]
	pub lint_semicolon_in_query: bool,
}

impl Default for RouterConfig {
	fn default() -> Self {
		RouterConfig {
			listen_addrs: vec!["0.0.0.0:8080".parse().unwrap()],
			admin_addr: "127.0.0.1:8081".parse().unwrap(),
			tls: None,
			max_request_header_bytes: default_max_header_bytes(),
			enable_http2: false,
			empty_pool_response_policy: EmptyPoolResponsePolicy::default(),
			hop_by_hop_filter_allowlist: HashSet::new(),
			forwarded_client_cert_mode: ForwardedClientCertMode::default(),
			response_add_headers_if_not_present: Vec::new(),
			response_remove_headers: Vec::new(),
			framework_always_remove_headers: vec!["X-Cf-Forwarded-Url".to_string()],
			route_service_enabled: false,
			route_service_recommend_https: true,
			route_service_hairpinning: false,
			route_service_signature_expiry: default_signature_expiry(),
			load_balance_policy: LoadBalancePolicy::RoundRobin,
			sticky_session_cookie_names: vec!["JSESSIONID".to_string(), "VCAP_ID".to_string()],
			local_zone: None,
			max_conns_per_backend: 0,
			trace_vendor_id: "gorouter".to_string(),
			trace_tenant_id: None,
			backend_read_timeout: Duration::from_secs(900),
			healthcheck_user_agent: "HTTP-Monitor/1.1".to_string(),
			lint_semicolon_in_query: true,
		}
	}
}

impl RouterConfig {
	/// Clamps `max_request_header_bytes` into `[1, 1 MiB]`
	/// and normalizes case-sensitive sets to the canonical case expected by
	/// comparisons elsewhere in the pipeline.
	pub fn normalize(mut self) -> Self {
		self.max_request_header_bytes = self.max_request_header_bytes.clamp(1, 1024 * 1024);
		self
	}

	pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
		let cfg: RouterConfig = serde_yaml::from_str(contents)?;
		Ok(cfg.normalize())
	}
}
