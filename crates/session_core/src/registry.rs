use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use admission::{Defender, DefenderEvent};
use hooks::{ActiveHookCounter, PostDisconnectHook};
use supervisor_types::{ConnectionStatus, Protocol, SupervisorError};
use tracing::{debug, info};

use crate::session::Session;

/// External audit trail for login-related connection events, separate from the defender's
/// abuse scoring (SPEC_FULL.md §4.E Remove, scenario S2: a removed unauthenticated FTP
/// session must both feed the defender and emit a "no auth tried" login event to external
/// auditors).
pub trait Auditor: Send + Sync {
	fn record_no_auth_tried(&self, ip: &str, protocol: Protocol);
}

/// The neutral auditor used when no external audit sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditor;

impl Auditor for NoopAuditor {
	fn record_no_auth_tried(&self, _ip: &str, _protocol: Protocol) {}
}

/// Emits the login event via `tracing` instead of an external audit backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditor;

impl Auditor for TracingAuditor {
	fn record_no_auth_tried(&self, ip: &str, protocol: Protocol) {
		info!(ip, ?protocol, "no auth tried");
	}
}

/// Snapshot view of the registry's occupancy, published to the metrics sink on mutation
/// (SPEC_FULL.md §4.E "Publish current size to the metrics sink").
pub trait MetricsSink: Send + Sync {
	fn set_session_count(&self, count: usize);
}

/// The neutral sink used when no metrics backend is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
	fn set_session_count(&self, _count: usize) {}
}

/// Emits a `tracing` debug event instead of a counter — used when the caller wants the
/// occupancy visible in logs without reintroducing a metrics-exporter dependency.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
	fn set_session_count(&self, count: usize) {
		debug!(session_count = count, "session registry occupancy");
	}
}

struct Inner {
	sessions: Vec<Arc<Session>>,
	index: HashMap<String, usize>,
	per_user: HashMap<String, usize>,
}

impl Inner {
	fn new() -> Self {
		Self {
			sessions: Vec::new(),
			index: HashMap::new(),
			per_user: HashMap::new(),
		}
	}
}

/// Component E: the single source of truth for logical sessions (SPEC_FULL.md §3 Invariants
/// 1-4, §4.E). A plain `RwLock<Inner>` rather than a concurrent map — see DESIGN.md for why
/// a lock-free store cannot give the bijective id->index and swap-with-last guarantees the
/// sweepers depend on.
pub struct SessionRegistry {
	inner: RwLock<Inner>,
	defender: Arc<dyn Defender>,
	metrics: Arc<dyn MetricsSink>,
	post_disconnect_hook: Arc<dyn PostDisconnectHook>,
	active_hooks: Arc<ActiveHookCounter>,
	auditor: Arc<dyn Auditor>,
}

/// Per-role occupancy snapshot returned by `get_stats` (§4.E GetStats).
#[derive(Debug, Clone)]
pub struct SessionStats {
	pub total: usize,
	pub statuses: Vec<ConnectionStatus>,
}

impl SessionRegistry {
	#[must_use]
	pub fn new(defender: Arc<dyn Defender>, metrics: Arc<dyn MetricsSink>, post_disconnect_hook: Arc<dyn PostDisconnectHook>, active_hooks: Arc<ActiveHookCounter>, auditor: Arc<dyn Auditor>) -> Self {
		Self {
			inner: RwLock::new(Inner::new()),
			defender,
			metrics,
			post_disconnect_hook,
			active_hooks,
			auditor,
		}
	}

	fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
		self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
		self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	/// §4.E Add: rejects when the cap would be exceeded, else inserts and publishes size.
	pub fn add(&self, session: Session) -> Result<Arc<Session>, SupervisorError> {
		let session = Arc::new(session);
		let mut inner = self.write();

		if !session.username().is_empty() && session.max_sessions() > 0 {
			let current = *inner.per_user.get(session.username()).unwrap_or(&0);
			if current + 1 > session.max_sessions() {
				return Err(SupervisorError::too_many_open_sessions(current, session.max_sessions()));
			}
		}

		if !session.username().is_empty() {
			*inner.per_user.entry(session.username().to_string()).or_insert(0) += 1;
		}
		let session_index = inner.sessions.len();
		inner.index.insert(session.id().to_string(), session_index);
		inner.sessions.push(Arc::clone(&session));

		let total = inner.sessions.len();
		drop(inner);
		self.metrics.set_session_count(total);
		Ok(session)
	}

	/// §4.E Swap: replaces the existing session registered under the same id, re-checking
	/// the cap for the new username and closing the old session's filesystem afterward.
	/// Restores the prior username's count if the cap check fails.
	pub fn swap(&self, session: Session) -> Result<Arc<Session>, SupervisorError> {
		let session = Arc::new(session);
		let mut inner = self.write();

		let Some(&idx) = inner.index.get(session.id()) else {
			return Err(SupervisorError::NotExist);
		};
		let old = Arc::clone(&inner.sessions[idx]);

		if !old.username().is_empty() {
			if let Some(count) = inner.per_user.get_mut(old.username()) {
				*count = count.saturating_sub(1);
			}
		}

		if !session.username().is_empty() && session.max_sessions() > 0 {
			let current = *inner.per_user.get(session.username()).unwrap_or(&0);
			if current + 1 > session.max_sessions() {
				if !old.username().is_empty() {
					*inner.per_user.entry(old.username().to_string()).or_insert(0) += 1;
				}
				return Err(SupervisorError::too_many_open_sessions(current, session.max_sessions()));
			}
		}

		if !session.username().is_empty() {
			*inner.per_user.entry(session.username().to_string()).or_insert(0) += 1;
		}
		inner.sessions[idx] = Arc::clone(&session);
		drop(inner);

		old.close_fs();
		Ok(session)
	}

	/// §4.E Remove: O(1) swap-with-last removal, filesystem close, per-user decrement,
	/// unauthenticated-FTP audit event, and asynchronous post-disconnect hook dispatch for
	/// the fixed disconnect-hook protocol set. The hook fires after the write lock is
	/// released, matching §5's ordering guarantee that the caller only holds the write
	/// lock for the unlink itself.
	pub fn remove(&self, id: &str) -> bool {
		let removed = {
			let mut inner = self.write();
			let Some(idx) = inner.index.remove(id) else {
				return false;
			};
			let removed = inner.sessions.swap_remove(idx);
			if idx < inner.sessions.len() {
				let moved_id = inner.sessions[idx].id().to_string();
				inner.index.insert(moved_id, idx);
			}
			if !removed.username().is_empty() {
				if let Some(count) = inner.per_user.get_mut(removed.username()) {
					*count = count.saturating_sub(1);
					if *count == 0 {
						inner.per_user.remove(removed.username());
					}
				}
			}
			removed
		};

		let total = self.read().sessions.len();
		self.metrics.set_session_count(total);

		removed.close_fs();

		if removed.is_unauthenticated_ftp() {
			self.defender.add_event(removed.remote_ip(), DefenderEvent::HostEventNoLoginTried);
			self.auditor.record_no_auth_tried(removed.remote_ip(), removed.protocol());
		}

		if removed.protocol().fires_disconnect_hook() {
			let hook = Arc::clone(&self.post_disconnect_hook);
			let status = removed.to_status();
			let protocol = removed.protocol();
			let guard = self.active_hooks.guard();
			tokio::spawn(async move {
				hook.dispatch(protocol, &status).await;
				drop(guard);
			});
		}

		true
	}

	#[must_use]
	pub fn get_stats(&self, role: &str) -> SessionStats {
		let inner = self.read();
		let statuses = inner
			.sessions
			.iter()
			.filter(|s| role.is_empty() || s.role() == role)
			.map(|s| s.to_status())
			.collect();
		SessionStats { total: inner.sessions.len(), statuses }
	}

	/// §4.E Close: schedules a non-blocking disconnect if `role` is empty or matches.
	#[must_use]
	pub fn close(&self, id: &str, role: &str) -> bool {
		let inner = self.read();
		let Some(&idx) = inner.index.get(id) else {
			return false;
		};
		let session = &inner.sessions[idx];
		if role.is_empty() || session.role() == role {
			session.disconnect("closed by administrator");
			true
		} else {
			false
		}
	}

	#[must_use]
	pub fn get(&self, id: &str) -> Option<Arc<Session>> {
		let inner = self.read();
		inner.index.get(id).map(|&idx| Arc::clone(&inner.sessions[idx]))
	}

	#[must_use]
	pub fn with_sessions<R>(&self, f: impl FnOnce(&[Arc<Session>]) -> R) -> R {
		f(&self.read().sessions)
	}
}
