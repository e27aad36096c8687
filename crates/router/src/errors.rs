//! Error taxonomy for the request pipeline.
//!
//! Every stage either short-circuits with one of these variants or calls
//! `next`; nothing throws across the pipeline boundary. Each
//! variant carries enough to reconstruct the short-circuit response via
//! [`PipelineError::status`].

use http::StatusCode;
use thiserror::Error;

/// The kinds of failure the pipeline can surface, independent of the literal
/// message text (which lives alongside the status/tag in `status()`).
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
	#[error("unsupported HTTP version")]
	UnsupportedProtocol,

	#[error("request had empty Host header")]
	EmptyHost,

	#[error("invalid X-CF-App-Instance header")]
	InvalidAppInstanceHeader,

	#[error("requested route ('{0}') does not exist")]
	UnknownRoute(String),

	#[error("instance ({0}) not found for route")]
	InstanceNotFound(String),

	#[error("no available endpoints")]
	NoEndpoints,

	#[error("has reached the connection limit")]
	ConnectionLimitReached,

	#[error("request head exceeded the maximum size")]
	MaxRequestSizeExceeded,

	#[error("support for route services is disabled")]
	RouteServiceUnsupported,

	#[error("websocket requests are not supported for routes bound to Route Services")]
	RouteServiceUpgradeUnsupported,

	#[error("failed to validate Route Service Signature")]
	RouteServiceValidation,

	#[error("upstream TLS error: {0}")]
	UpstreamTls(UpstreamTlsError),

	#[error("upstream transport error: {0}")]
	UpstreamTransport(String),

	#[error("upstream did not respond within the configured timeout")]
	UpstreamTimeout,

	#[error("client aborted the request")]
	ClientAbort,

	#[error("internal error recovered from a panic")]
	Internal,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTlsError {
	#[error("hostname mismatch")]
	HostnameMismatch,
	#[error("untrusted certificate")]
	UntrustedCert,
	#[error("TLS requested on a non-TLS backend")]
	NonTlsBackend,
	#[error("backend required a client certificate")]
	ClientCertRequired,
}

impl PipelineError {
	/// `(status, router-error tag)` pair emitted on the response and in the
	/// access log for this failure.
	pub fn status(&self) -> (StatusCode, Option<&'static str>) {
		use PipelineError::*;
		match self {
			UnsupportedProtocol => (StatusCode::BAD_REQUEST, None),
			EmptyHost => (StatusCode::BAD_REQUEST, Some("empty_host")),
			InvalidAppInstanceHeader => (
				StatusCode::BAD_REQUEST,
				Some("invalid_cf_app_instance_header"),
			),
			UnknownRoute(_) => (StatusCode::NOT_FOUND, Some("unknown_route")),
			InstanceNotFound(_) => (StatusCode::BAD_REQUEST, Some("unknown_route")),
			NoEndpoints => (StatusCode::SERVICE_UNAVAILABLE, Some("no_endpoints")),
			ConnectionLimitReached => (
				StatusCode::SERVICE_UNAVAILABLE,
				Some("Connection Limit Reached"),
			),
			MaxRequestSizeExceeded => (
				StatusCode::PAYLOAD_TOO_LARGE,
				Some("max-request-size-exceeded"),
			),
			RouteServiceUnsupported => {
				(StatusCode::BAD_GATEWAY, Some("route_service_unsupported"))
			},
			RouteServiceUpgradeUnsupported => (
				StatusCode::SERVICE_UNAVAILABLE,
				Some("route_service_unsupported"),
			),
			RouteServiceValidation => (StatusCode::BAD_REQUEST, None),
			UpstreamTls(e) => (e.status(), None),
			UpstreamTransport(_) => (StatusCode::BAD_GATEWAY, None),
			UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, None),
			ClientAbort => (StatusCode::from_u16(499).unwrap(), None),
			Internal => (StatusCode::BAD_GATEWAY, Some("unknown_failure")),
		}
	}

	/// The literal body text for a handful of short-circuit responses;
	/// most variants have no fixed body and the caller composes one from
	/// `Display`.
	pub fn body(&self) -> String {
		match self {
			PipelineError::EmptyHost => "Request had empty Host header".to_string(),
			PipelineError::InvalidAppInstanceHeader => {
				"Invalid X-CF-App-Instance Header".to_string()
			},
			PipelineError::UnknownRoute(host) => {
				format!("Requested route ('{host}') does not exist.")
			},
			PipelineError::InstanceNotFound(instance) => {
				format!("Requested instance ({instance}) does not exist for route")
			},
			PipelineError::NoEndpoints => "no available endpoints".to_string(),
			PipelineError::ConnectionLimitReached => "has reached the connection limit.".to_string(),
			PipelineError::RouteServiceValidation => {
				"Failed to validate Route Service Signature".to_string()
			},
			other => other.to_string(),
		}
	}
}

impl UpstreamTlsError {
	fn status(&self) -> StatusCode {
		match self {
			UpstreamTlsError::HostnameMismatch => StatusCode::from_u16(525).unwrap(),
			UpstreamTlsError::UntrustedCert => StatusCode::from_u16(526).unwrap(),
			UpstreamTlsError::NonTlsBackend => StatusCode::from_u16(496).unwrap(),
			UpstreamTlsError::ClientCertRequired => StatusCode::SERVICE_UNAVAILABLE,
		}
	}
}
