use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::session::now_millis;

/// Closes the underlying network connection behind an SSH channel. Implemented by the
/// protocol frontend that owns the transport; the table itself never touches the socket
/// (SPEC_FULL.md §4.D "channels are closed externally").
pub trait SshChannelCloser: Send + Sync {
	fn close(&self);
}

/// A single SSH network connection backing zero or more logical sessions, linked by
/// substring match of the SSH id inside session ids (`…_<sshid>_…`, SPEC_FULL.md §3).
pub struct SshChannel {
	id: String,
	last_activity_ms: AtomicI64,
	closer: Option<Arc<dyn SshChannelCloser>>,
}

impl SshChannel {
	#[must_use]
	pub fn new(id: impl Into<String>) -> Self {
		Self::with_closer(id, None)
	}

	#[must_use]
	pub fn with_closer(id: impl Into<String>, closer: Option<Arc<dyn SshChannelCloser>>) -> Self {
		Self {
			id: id.into(),
			last_activity_ms: AtomicI64::new(now_millis()),
			closer,
		}
	}

	pub fn close(&self) {
		if let Some(closer) = &self.closer {
			closer.close();
		}
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn last_activity(&self) -> i64 {
		self.last_activity_ms.load(Ordering::Relaxed)
	}

	pub fn record_activity(&self) {
		self.last_activity_ms.store(now_millis(), Ordering::Relaxed);
	}

	#[must_use]
	pub fn idle_for_ms(&self) -> i64 {
		(now_millis() - self.last_activity()).max(0)
	}
}

struct Inner {
	channels: Vec<SshChannel>,
	index: HashMap<String, usize>,
}

/// Component D: same append-and-swap-with-last pattern as the Session Registry (E), guarded
/// by a single `RwLock`. Channels are closed externally; this table only unlinks them.
pub struct SshChannelTable {
	inner: RwLock<Inner>,
}

impl SshChannelTable {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(Inner { channels: Vec::new(), index: HashMap::new() }),
		}
	}

	pub fn add(&self, channel: SshChannel) {
		let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		let channel_index = inner.channels.len();
		inner.index.insert(channel.id().to_string(), channel_index);
		inner.channels.push(channel);
	}

	pub fn remove(&self, id: &str) -> bool {
		let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		let Some(idx) = inner.index.remove(id) else {
			return false;
		};
		inner.channels.swap_remove(idx);
		if idx < inner.channels.len() {
			let moved_id = inner.channels[idx].id().to_string();
			inner.index.insert(moved_id, idx);
		}
		true
	}

	pub fn record_activity(&self, id: &str) {
		let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
		if let Some(&idx) = inner.index.get(id) {
			inner.channels[idx].record_activity();
		}
	}

	/// Snapshot of (id, idle-for-ms) pairs for the Idle Sweeper (G) to evaluate under its
	/// own read lock, without holding this table's lock across the sweep decision.
	#[must_use]
	pub fn idle_snapshot(&self) -> Vec<(String, i64)> {
		let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
		inner.channels.iter().map(|c| (c.id().to_string(), c.idle_for_ms())).collect()
	}

	/// Schedules a non-blocking close for `id`; the channel is unlinked from the table
	/// separately by the caller once the close has been issued (sweeper-driven, not here).
	pub fn close(&self, id: &str) {
		let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
		if let Some(&idx) = inner.index.get(id) {
			inner.channels[idx].close();
		}
	}
}

impl Default for SshChannelTable {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::{SshChannel, SshChannelTable};

	#[test]
	fn add_remove_round_trips_and_unlinks() {
		let table = SshChannelTable::new();
		table.add(SshChannel::new("ssh-1"));
		table.add(SshChannel::new("ssh-2"));
		assert!(table.remove("ssh-1"));
		let snapshot = table.idle_snapshot();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].0, "ssh-2");
	}

	#[test]
	fn remove_of_unknown_id_is_a_no_op() {
		let table = SshChannelTable::new();
		assert!(!table.remove("missing"));
	}
}
