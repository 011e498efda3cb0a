use std::sync::Arc;
use std::time::Duration;

use quota::QuotaSweeper;
use session_core::IdleSweeper;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Component J: registers the transfer sweep at a base interval, and (only if the idle
/// timeout is non-zero) the idle sweep at a coarser multiple of it (SPEC_FULL.md §4.J).
pub struct Scheduler {
	quota: Arc<QuotaSweeper>,
	idle: Option<IdleSweeper>,
	base_interval: Duration,
	shutdown: CancellationToken,
}

impl Scheduler {
	#[must_use]
	pub fn new(quota: Arc<QuotaSweeper>, idle: Option<IdleSweeper>, base_interval: Duration, shutdown: CancellationToken) -> Self {
		Self { quota, idle, base_interval, shutdown }
	}

	/// Starts both registered jobs as detached tasks and returns their handles.
	pub fn start(self) -> Vec<tokio::task::JoinHandle<()>> {
		let mut handles = vec![Self::spawn_quota_loop(self.quota, self.base_interval, self.shutdown.clone())];
		if let Some(idle) = self.idle {
			handles.push(idle.start());
		}
		handles
	}

	fn spawn_quota_loop(quota: Arc<QuotaSweeper>, base_interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = interval(base_interval);
			loop {
				tokio::select! {
					() = shutdown.cancelled() => {
						info!("quota sweep scheduler received shutdown signal");
						break;
					}
					_ = ticker.tick() => {
						let report = quota.sweep_once().await;
						if report.transfers_closed > 0 {
							info!(transfers_checked = report.transfers_checked, transfers_closed = report.transfers_closed, "quota sweep closed overquota transfers");
						}
						tokio::task::yield_now().await;
					}
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::Scheduler;
	use admission::NoopDefender;
	use hooks::{ActiveHookCounter, NoopPostDisconnectHook};
	use quota::{OverquotaTransfer, QuotaSweeper, TransferQuotaChecker};
	use session_core::{NoopAuditor, NoopMetricsSink, SessionRegistry, SshChannelTable};
	use std::sync::Arc;
	use std::time::Duration;
	use tokio_util::sync::CancellationToken;

	struct EmptyChecker;

	#[async_trait::async_trait]
	impl TransferQuotaChecker for EmptyChecker {
		async fn update_transfer_current_sizes(&self, _uploaded: u64, _downloaded: u64, _transfer_id: i64, _conn_id: &str) {}
		async fn get_overquota_transfers(&self) -> Vec<OverquotaTransfer> {
			Vec::new()
		}
	}

	#[tokio::test]
	async fn idle_job_is_registered_only_when_requested() {
		let registry = Arc::new(SessionRegistry::new(
			Arc::new(NoopDefender),
			Arc::new(NoopMetricsSink),
			Arc::new(NoopPostDisconnectHook),
			Arc::new(ActiveHookCounter::new()),
			Arc::new(NoopAuditor),
		));
		let quota = Arc::new(QuotaSweeper::new(Arc::clone(&registry), Arc::new(EmptyChecker)));
		let shutdown = CancellationToken::new();

		let scheduler = Scheduler::new(Arc::clone(&quota), None, Duration::from_millis(5), shutdown.clone());
		let handles = scheduler.start();
		assert_eq!(handles.len(), 1);

		let ssh_channels = Arc::new(SshChannelTable::new());
		let idle = session_core::IdleSweeper::new(registry, ssh_channels, Duration::from_secs(60), Duration::from_secs(180), shutdown.clone());
		let scheduler = Scheduler::new(quota, Some(idle), Duration::from_millis(5), shutdown.clone());
		let handles = scheduler.start();
		assert_eq!(handles.len(), 2);

		shutdown.cancel();
		for handle in handles {
			let _ = handle.await;
		}
	}
}
