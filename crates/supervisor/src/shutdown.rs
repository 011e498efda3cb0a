use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hooks::ActiveHookCounter;
use session_core::SessionRegistry;
use supervisor_types::SupervisorError;
use tokio::time::interval;
use tracing::info;

/// Component I: a single atomic boolean plus the drain loop that waits for in-flight work
/// to finish before a hard cutoff (SPEC_FULL.md §4.I).
pub struct ShutdownCoordinator {
	shutting_down: AtomicBool,
	active_hooks: Arc<ActiveHookCounter>,
	registry: Arc<SessionRegistry>,
}

impl ShutdownCoordinator {
	#[must_use]
	pub fn new(active_hooks: Arc<ActiveHookCounter>, registry: Arc<SessionRegistry>) -> Self {
		Self {
			shutting_down: AtomicBool::new(false),
			active_hooks,
			registry,
		}
	}

	/// Returns the shutting-down sentinel once the flag is set (§4.I `CheckClosing`).
	pub fn check_closing(&self) -> Result<(), SupervisorError> {
		if self.is_shutting_down() {
			Err(SupervisorError::ShuttingDown)
		} else {
			Ok(())
		}
	}

	#[must_use]
	pub fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::SeqCst)
	}

	/// Invoked once at shutdown. A zero grace period returns immediately without flipping
	/// the flag at all; a repeat call after the flag is already set also returns
	/// immediately (§4.I: "if already flipped it returns").
	pub async fn wait_for_transfers(&self, grace_seconds: u64) {
		if grace_seconds == 0 {
			return;
		}
		if self.shutting_down.swap(true, Ordering::SeqCst) {
			return;
		}

		let deadline = tokio::time::Instant::now() + Duration::from_secs(grace_seconds);
		let mut ticker = interval(Duration::from_secs(3));
		loop {
			ticker.tick().await;
			let pending_transfers = self.sessions_with_transfers();
			let pending_hooks = self.active_hooks.current();
			if pending_transfers == 0 && pending_hooks == 0 {
				info!("graceful shutdown drained: no transfers or hooks remain");
				return;
			}
			if tokio::time::Instant::now() >= deadline {
				info!(pending_transfers, pending_hooks, "graceful shutdown grace period expired, forcing cutoff");
				return;
			}
		}
	}

	fn sessions_with_transfers(&self) -> usize {
		self.registry.with_sessions(|sessions| sessions.iter().filter(|s| s.has_transfers()).count())
	}
}

#[cfg(test)]
mod tests {
	use super::ShutdownCoordinator;
	use admission::NoopDefender;
	use hooks::{ActiveHookCounter, NoopPostDisconnectHook};
	use session_core::{NoopAuditor, NoopMetricsSink, Session, SessionRegistry, Transfer};
	use std::sync::Arc;
	use std::time::Duration;
	use supervisor_types::{Protocol, TransferType};

	fn coordinator() -> (ShutdownCoordinator, Arc<SessionRegistry>, Arc<ActiveHookCounter>) {
		let hooks = Arc::new(ActiveHookCounter::new());
		let registry = Arc::new(SessionRegistry::new(
			Arc::new(NoopDefender),
			Arc::new(NoopMetricsSink),
			Arc::new(NoopPostDisconnectHook),
			Arc::clone(&hooks),
			Arc::new(NoopAuditor),
		));
		let c = ShutdownCoordinator::new(Arc::clone(&hooks), Arc::clone(&registry));
		(c, registry, hooks)
	}

	#[tokio::test]
	async fn zero_grace_seconds_returns_immediately_without_flipping_the_flag() {
		let (c, _registry, _hooks) = coordinator();
		c.wait_for_transfers(0).await;
		assert!(!c.is_shutting_down());
	}

	#[test]
	fn check_closing_denies_once_the_flag_is_set() {
		let (c, _registry, _hooks) = coordinator();
		assert!(c.check_closing().is_ok());
		c.shutting_down.store(true, std::sync::atomic::Ordering::SeqCst);
		assert!(matches!(c.check_closing(), Err(supervisor_types::SupervisorError::ShuttingDown)));
	}

	#[tokio::test(start_paused = true)]
	async fn s5_graceful_shutdown_waits_for_transfers_to_drain() {
		let (c, registry, _hooks) = coordinator();
		let session = registry.add(Session::builder(Protocol::Sftp, "1.1.1.1:22").id("s1").build()).unwrap();
		session.add_transfer(Transfer::new(1, TransferType::Upload, "/x", true, None));

		let c = Arc::new(c);
		let c2 = Arc::clone(&c);
		let wait_handle = tokio::spawn(async move { c2.wait_for_transfers(10).await });

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(c.is_shutting_down());

		session.remove_transfer(1);
		tokio::time::sleep(Duration::from_secs(4)).await;
		wait_handle.await.unwrap();
	}
}
