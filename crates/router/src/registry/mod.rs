//! The route registry: an opaque lookup service from the pipeline's point of
//! view. The registry is read-only from the pipeline's
//! perspective; population is provided only as a minimal `upsert`/`remove`
//! surface so the crate is runnable and testable end to end — the real
//! control-plane wiring (xDS, NATS, etc.) is explicitly out of scope.

pub mod iterator;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

pub use iterator::{EndpointIterator, LoadBalancePolicy};

/// A route key is `hostWithoutPort(Host) + escapedPath(URL)`.
/// Hosts are lower-cased before comparison (see DESIGN.md's OQ1 decision).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

const PATH_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

impl RouteKey {
	pub fn new(host: &str, path: &str) -> Self {
		let host = host_without_port(host).to_ascii_lowercase();
		let escaped_path = utf8_percent_encode(path, PATH_ESCAPE).to_string();
		RouteKey(format!("{host}{escaped_path}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// Strips a trailing `:port` from a `Host`-header-shaped string, leaving
/// IPv6 literals (`[::1]:80`) and bare hostnames untouched.
pub fn host_without_port(host: &str) -> &str {
	if let Some(rest) = host.strip_prefix('[') {
		// IPv6 literal: `[::1]` or `[::1]:8080`.
		return match rest.find(']') {
			Some(idx) => &host[..idx + 2],
			None => host,
		};
	}
	match host.rsplit_once(':') {
		Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => h,
		_ => host,
	}
}

/// A single backend instance, as populated by the (out-of-scope) control
/// plane. Immutable from the pipeline's perspective save for the connection
/// counter, which the transport collaborator maintains with atomics.
#[derive(Debug)]
pub struct Endpoint {
	pub application_id: String,
	pub host: String,
	pub port: u16,
	pub private_instance_id: Option<String>,
	pub private_instance_index: Option<u32>,
	pub tags: HashMap<String, String>,
	pub ttl_secs: Option<u32>,
	pub route_service_url: Option<String>,
	pub modification_tag: String,
	/// Set by the registry's housekeeping when an endpoint's TTL has lapsed;
	/// `EndpointPool::each` skips stale entries.
	pub stale: std::sync::atomic::AtomicBool,
	open_connections: AtomicUsize,
}

impl Endpoint {
	pub fn new(application_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
		Endpoint {
			application_id: application_id.into(),
			host: host.into(),
			port,
			private_instance_id: None,
			private_instance_index: None,
			tags: HashMap::new(),
			ttl_secs: None,
			route_service_url: None,
			modification_tag: String::new(),
			stale: std::sync::atomic::AtomicBool::new(false),
			open_connections: AtomicUsize::new(0),
		}
	}

	pub fn canonical_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn is_stale(&self) -> bool {
		self.stale.load(Ordering::Acquire)
	}

	/// Approximate reading; admission checks tolerate staleness.
	pub fn open_connections(&self) -> usize {
		self.open_connections.load(Ordering::Acquire)
	}

	pub fn incr_connections(&self) -> usize {
		self.open_connections.fetch_add(1, Ordering::AcqRel) + 1
	}

	pub fn decr_connections(&self) {
		self.open_connections.fetch_sub(1, Ordering::AcqRel);
	}

	fn at_cap(&self, max_conns_per_backend: usize) -> bool {
		max_conns_per_backend != 0 && self.open_connections() >= max_conns_per_backend
	}
}

/// A set of endpoints sharing a route key. Endpoints is an `Arc` list so
/// `PoolsMatch` is cheap structural comparison, not identity.
#[derive(Debug)]
pub struct EndpointPool {
	host: String,
	context_path: String,
	route_service_url: Option<String>,
	endpoints: Vec<Arc<Endpoint>>,
	max_conns_per_backend: usize,
}

impl EndpointPool {
	pub fn new(
		host: impl Into<String>,
		context_path: impl Into<String>,
		endpoints: Vec<Arc<Endpoint>>,
		max_conns_per_backend: usize,
	) -> Self {
		let route_service_url = endpoints
			.first()
			.and_then(|e| e.route_service_url.clone());
		EndpointPool {
			host: host.into(),
			context_path: context_path.into(),
			route_service_url,
			endpoints,
			max_conns_per_backend,
		}
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn context_path(&self) -> &str {
		&self.context_path
	}

	pub fn route_service_url(&self) -> Option<&str> {
		self.route_service_url.as_deref()
	}

	pub fn is_empty(&self) -> bool {
		!self.endpoints.iter().any(|e| !e.is_stale())
	}

	/// True when every non-stale endpoint has reached its per-backend
	/// connection cap.
	pub fn is_overloaded(&self) -> bool {
		if self.max_conns_per_backend == 0 {
			return false;
		}
		let mut any_live = false;
		for e in self.endpoints.iter().filter(|e| !e.is_stale()) {
			any_live = true;
			if !e.at_cap(self.max_conns_per_backend) {
				return false;
			}
		}
		any_live
	}

	pub fn each(&self, mut f: impl FnMut(&Arc<Endpoint>)) {
		for e in &self.endpoints {
			if !e.is_stale() {
				f(e);
			}
		}
	}

	pub fn endpoints(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
		self.endpoints.iter().filter(|e| !e.is_stale())
	}

	pub fn max_conns_per_backend(&self) -> usize {
		self.max_conns_per_backend
	}

	/// Structural equality used by the route-service return validation
	///. Symmetric and reflexive
	/// property 6: compares `(host, context_path)` plus the endpoint set by
	/// canonical address, not by `Arc` identity.
	pub fn pools_match(a: &EndpointPool, b: &EndpointPool) -> bool {
		if a.host != b.host || a.context_path != b.context_path {
			return false;
		}
		let mut a_addrs: Vec<String> = a.endpoints().map(|e| e.canonical_addr()).collect();
		let mut b_addrs: Vec<String> = b.endpoints().map(|e| e.canonical_addr()).collect();
		a_addrs.sort();
		b_addrs.sort();
		a_addrs == b_addrs
	}
}

/// A Host+appID+index key, used by `lookup_with_instance`.
#[derive(Debug, Clone)]
pub struct InstanceKey<'a> {
	pub app_id: &'a str,
	pub index: u32,
}

/// The registry collaborator interface. Implementations must
/// provide lookups that are linearizable with respect to their own updates
/// — read-mostly, lock-free reads are expected.
pub trait Registry: Send + Sync {
	fn lookup(&self, key: &RouteKey) -> Option<Arc<EndpointPool>>;
	fn lookup_with_instance(
		&self,
		key: &RouteKey,
		instance: InstanceKey<'_>,
	) -> Option<Arc<EndpointPool>>;
}

/// A lock-free, read-mostly in-memory registry built on `ArcSwap`, matching
/// the teacher's `store::binds` read-mostly pattern.
#[derive(Default)]
pub struct InMemoryRegistry {
	routes: ArcSwap<HashMap<RouteKey, Arc<EndpointPool>>>,
}

impl InMemoryRegistry {
	pub fn new() -> Self {
		InMemoryRegistry {
			routes: ArcSwap::from_pointee(HashMap::new()),
		}
	}

	pub fn upsert(&self, key: RouteKey, pool: Arc<EndpointPool>) {
		self.routes.rcu(|routes| {
			let mut next = HashMap::clone(routes);
			next.insert(key.clone(), pool.clone());
			next
		});
	}

	pub fn remove(&self, key: &RouteKey) {
		self.routes.rcu(|routes| {
			let mut next = HashMap::clone(routes);
			next.remove(key);
			next
		});
	}

	pub fn len(&self) -> usize {
		self.routes.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Registry for InMemoryRegistry {
	fn lookup(&self, key: &RouteKey) -> Option<Arc<EndpointPool>> {
		self.routes.load().get(key).cloned()
	}

	fn lookup_with_instance(
		&self,
		key: &RouteKey,
		instance: InstanceKey<'_>,
	) -> Option<Arc<EndpointPool>> {
		let pool = self.routes.load().get(key).cloned()?;
		let has_instance = pool.endpoints().any(|e| {
			e.application_id == instance.app_id
				&& e.private_instance_index == Some(instance.index)
		});
		if has_instance { Some(pool) } else { None }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn host_without_port_strips_trailing_port() {
		assert_eq!(host_without_port("example.com:8080"), "example.com");
		assert_eq!(host_without_port("example.com"), "example.com");
		assert_eq!(host_without_port("[::1]:8080"), "[::1]");
		assert_eq!(host_without_port("[::1]"), "[::1]");
	}

	#[test]
	fn route_key_lowercases_host() {
		let k = RouteKey::new("Example.COM:80", "/Foo");
		assert_eq!(k.as_str(), "example.com/Foo");
	}

	#[test]
	fn pools_match_is_symmetric_and_reflexive() {
		let e1 = Arc::new(Endpoint::new("app", "1.2.3.4", 80));
		let e2 = Arc::new(Endpoint::new("app", "1.2.3.5", 80));
		let a = EndpointPool::new("h", "/p", vec![e1.clone(), e2.clone()], 0);
		let b = EndpointPool::new("h", "/p", vec![e2, e1], 0);
		assert!(EndpointPool::pools_match(&a, &a));
		assert!(EndpointPool::pools_match(&a, &b));
		assert!(EndpointPool::pools_match(&b, &a));
	}

	#[test]
	fn pools_match_rejects_different_hosts() {
		let e1 = Arc::new(Endpoint::new("app", "1.2.3.4", 80));
		let a = EndpointPool::new("h1", "/p", vec![e1.clone()], 0);
		let b = EndpointPool::new("h2", "/p", vec![e1], 0);
		assert!(!EndpointPool::pools_match(&a, &b));
	}

	#[test]
	fn overloaded_when_every_endpoint_at_cap() {
		let e1 = Arc::new(Endpoint::new("app", "1.2.3.4", 80));
		let e2 = Arc::new(Endpoint::new("app", "1.2.3.5", 80));
		e1.incr_connections();
		let pool = EndpointPool::new("h", "/p", vec![e1, e2], 1);
		assert!(!pool.is_overloaded());
	}

	#[test]
	fn not_overloaded_when_cap_is_zero() {
		let e1 = Arc::new(Endpoint::new("app", "1.2.3.4", 80));
		e1.incr_connections();
		let pool = EndpointPool::new("h", "/p", vec![e1], 0);
		assert!(!pool.is_overloaded());
	}

	#[test]
	fn lookup_with_instance_requires_matching_index() {
		let reg = InMemoryRegistry::new();
		let mut e = Endpoint::new("app-1", "1.2.3.4", 80);
		e.private_instance_index = Some(0);
		let e = Arc::new(e);
		let key = RouteKey::new("example.com", "/");
		reg.upsert(key.clone(), Arc::new(EndpointPool::new("example.com", "/", vec![e], 0)));

		assert!(
			reg
				.lookup_with_instance(
					&key,
					InstanceKey {
						app_id: "app-1",
						index: 0
					}
				)
				.is_some()
		);
		assert!(
			reg
				.lookup_with_instance(
					&key,
					InstanceKey {
						app_id: "app-1",
						index: 1
					}
				)
				.is_none()
		);
	}
}
