use std::collections::HashMap;
use std::sync::RwLock;

use crate::session::now_millis;

/// A single in-progress long scan (SPEC_FULL.md §3 Scan record).
#[derive(Debug, Clone)]
pub struct ScanRecord {
	pub key: String,
	pub start_time_ms: i64,
	pub role: String,
}

/// One lock-guarded set of scan keys (§4.K). The same shape backs user-scans, folder-scans,
/// and metadata-checks — they differ only in which key space they track.
pub struct ScanRegistry {
	entries: RwLock<HashMap<String, ScanRecord>>,
}

impl ScanRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self { entries: RwLock::new(HashMap::new()) }
	}

	/// Returns `false` without inserting if `key` is already present — re-adding the same
	/// key fails (§3 Scan record lifecycle).
	pub fn add(&self, key: impl Into<String>, role: impl Into<String>) -> bool {
		let key = key.into();
		let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		if entries.contains_key(&key) {
			return false;
		}
		entries.insert(
			key.clone(),
			ScanRecord {
				key,
				start_time_ms: now_millis(),
				role: role.into(),
			},
		);
		true
	}

	pub fn remove(&self, key: &str) -> bool {
		self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key).is_some()
	}

	/// Snapshot filtered by role; an empty role returns every entry. The role itself is
	/// stripped from each returned record's key space view per §4.K (callers already know
	/// which registry, hence which role, they asked for).
	#[must_use]
	pub fn get(&self, role: &str) -> Vec<ScanRecord> {
		self.entries
			.read()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
			.values()
			.filter(|r| role.is_empty() || r.role == role)
			.cloned()
			.collect()
	}
}

impl Default for ScanRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Bundles the three §4.K scan registries the core exposes: user-scans, folder-scans, and
/// metadata-checks.
#[derive(Default)]
pub struct ScanRegistries {
	pub user_scans: ScanRegistry,
	pub folder_scans: ScanRegistry,
	pub metadata_checks: ScanRegistry,
}

impl ScanRegistries {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

#[cfg(test)]
mod tests {
	use super::ScanRegistry;

	#[test]
	fn readding_the_same_key_fails() {
		let registry = ScanRegistry::new();
		assert!(registry.add("alice", "admin"));
		assert!(!registry.add("alice", "admin"));
	}

	#[test]
	fn get_filters_by_role() {
		let registry = ScanRegistry::new();
		registry.add("alice", "admin");
		registry.add("bob", "user");
		let admins = registry.get("admin");
		assert_eq!(admins.len(), 1);
		assert_eq!(admins[0].key, "alice");
		assert_eq!(registry.get("").len(), 2);
	}

	#[test]
	fn remove_unknown_key_returns_false() {
		let registry = ScanRegistry::new();
		assert!(!registry.remove("missing"));
	}
}
