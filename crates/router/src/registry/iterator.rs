//! The endpoint iterator consumed by `BackendDispatch` and, for access-log
//! attribution only, by `MaxRequestSize`.

use std::sync::Arc;

use super::Endpoint;

/// Load-balancing policy selecting the base ordering before sticky-session
/// and availability-zone adjustments are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancePolicy {
	#[default]
	RoundRobin,
	LeastConnection,
}

/// An exhausted-on-drain iterator over a pool's live endpoints. Construction
/// orders the candidate list once; `next()` walks it, skipping endpoints at
/// their connection cap, and returns `None` once none remain.
pub struct EndpointIterator {
	candidates: Vec<Arc<Endpoint>>,
	max_conns_per_backend: usize,
	pos: usize,
}

impl EndpointIterator {
	/// Builds an iterator over `pool`'s endpoints.
	///
	/// * `policy` orders same-locality candidates (round-robin: insertion
	///   order; least-connection: ascending open-connection count).
	/// * `sticky_ids` (if non-empty) are tried first, in order, ahead of the
	///   policy-ordered remainder — these come from a sticky-session cookie.
	/// * `local_zone` moves same-zone endpoints (matched against the
	///   endpoint's `zone` tag) ahead of others, preserving relative order
	///   within each group (locality preferred over randomness).
	pub fn new(
		endpoints: impl Iterator<Item = Arc<Endpoint>>,
		policy: LoadBalancePolicy,
		max_conns_per_backend: usize,
		sticky_ids: &[String],
		local_zone: Option<&str>,
	) -> Self {
		let mut all: Vec<Arc<Endpoint>> = endpoints.collect();

		match policy {
			LoadBalancePolicy::RoundRobin => {},
			LoadBalancePolicy::LeastConnection => {
				all.sort_by_key(|e| e.open_connections());
			},
		}

		if let Some(zone) = local_zone {
			all.sort_by_key(|e| e.tags.get("zone").map(|z| z != zone).unwrap_or(true));
		}

		let mut ordered = Vec::with_capacity(all.len());
		if !sticky_ids.is_empty() {
			for id in sticky_ids {
				if let Some(pos) = all
					.iter()
					.position(|e| e.private_instance_id.as_deref() == Some(id.as_str()))
				{
					ordered.push(all.remove(pos));
				}
			}
		}
		ordered.append(&mut all);

		EndpointIterator {
			candidates: ordered,
			max_conns_per_backend,
			pos: 0,
		}
	}

	/// Returns the next endpoint under its connection cap, or `None` if the
	/// candidate list is exhausted.
	pub fn next(&mut self) -> Option<Arc<Endpoint>> {
		while self.pos < self.candidates.len() {
			let candidate = self.candidates[self.pos].clone();
			self.pos += 1;
			if self.max_conns_per_backend == 0
				|| candidate.open_connections() < self.max_conns_per_backend
			{
				return Some(candidate);
			}
		}
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::Endpoint;

	fn ep(id: &str) -> Arc<Endpoint> {
		let mut e = Endpoint::new("app", "1.2.3.4", 80);
		e.private_instance_id = Some(id.to_string());
		Arc::new(e)
	}

	#[test]
	fn skips_endpoints_at_cap() {
		let a = ep("a");
		let b = ep("b");
		a.incr_connections();
		let mut it = EndpointIterator::new(
			vec![a.clone(), b.clone()].into_iter(),
			LoadBalancePolicy::RoundRobin,
			1,
			&[],
			None,
		);
		let first = it.next().unwrap();
		assert_eq!(first.private_instance_id.as_deref(), Some("b"));
		assert!(it.next().is_none());
	}

	#[test]
	fn sticky_ids_tried_first() {
		let a = ep("a");
		let b = ep("b");
		let mut it = EndpointIterator::new(
			vec![a, b].into_iter(),
			LoadBalancePolicy::RoundRobin,
			0,
			&["b".to_string()],
			None,
		);
		assert_eq!(it.next().unwrap().private_instance_id.as_deref(), Some("b"));
		assert_eq!(it.next().unwrap().private_instance_id.as_deref(), Some("a"));
	}

	#[test]
	fn exhausted_iterator_returns_none() {
		let mut it = EndpointIterator::new(
			std::iter::empty(),
			LoadBalancePolicy::RoundRobin,
			0,
			&[],
			None,
		);
		assert!(it.next().is_none());
	}
}
