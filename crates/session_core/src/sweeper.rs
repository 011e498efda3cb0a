use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::SessionRegistry;
use crate::ssh_channel::SshChannelTable;

/// Fixed idle-login timeout for unauthenticated FTP sessions (SPEC_FULL.md §4.G).
const IDLE_LOGIN_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, Default)]
pub struct IdleSweepReport {
	pub channels_closed: usize,
	pub sessions_closed: usize,
}

/// Component G: sweeps E and D under their respective read locks and defers closures until
/// after each lock is released, the way this workspace's own `TimeoutMonitor` marks-then-
/// cleans-up in separate passes rather than mutating while iterating.
pub struct IdleSweeper {
	registry: Arc<SessionRegistry>,
	channels: Arc<SshChannelTable>,
	idle_timeout: Duration,
	check_interval: Duration,
	shutdown: CancellationToken,
}

impl IdleSweeper {
	#[must_use]
	pub fn new(registry: Arc<SessionRegistry>, channels: Arc<SshChannelTable>, idle_timeout: Duration, check_interval: Duration, shutdown: CancellationToken) -> Self {
		Self {
			registry,
			channels,
			idle_timeout,
			check_interval,
			shutdown,
		}
	}

	/// Spawns the periodic sweep loop; returns the handle so the caller can await shutdown.
	pub fn start(self) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move { self.run().await })
	}

	async fn run(self) {
		if self.idle_timeout.is_zero() {
			debug!("idle sweeper disabled: idle timeout is zero");
			return;
		}
		let mut ticker = interval(self.check_interval);
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => {
					info!("idle sweeper received shutdown signal");
					break;
				}
				_ = ticker.tick() => {
					let report = self.sweep_once();
					if report.channels_closed > 0 || report.sessions_closed > 0 {
						info!(channels_closed = report.channels_closed, sessions_closed = report.sessions_closed, "idle sweep closed stale connections");
					}
					tokio::task::yield_now().await;
				}
			}
		}
	}

	/// Runs one sweep cycle synchronously; exposed directly so the Scheduler (J) and tests
	/// can drive it without waiting on the interval.
	#[must_use]
	pub fn sweep_once(&self) -> IdleSweepReport {
		let idle_timeout_ms = i64::try_from(self.idle_timeout.as_millis()).unwrap_or(i64::MAX);
		let idle_login_timeout_ms = i64::try_from(IDLE_LOGIN_TIMEOUT.as_millis()).unwrap_or(i64::MAX);

		// A channel is spared if any linked session is still active (SPEC_FULL.md §4.G / S3:
		// a parallel session on the same channel with recent activity keeps the channel open
		// even though the channel's own last-activity marker is stale).
		let active_session_ids: Vec<String> = self.registry.with_sessions(|sessions| {
			sessions
				.iter()
				.filter(|s| {
					let idle = s.idle_for_ms();
					idle <= idle_timeout_ms && !(s.is_unauthenticated_ftp() && idle > idle_login_timeout_ms)
				})
				.map(|s| s.id().to_string())
				.collect()
		});

		let channels_to_close: Vec<String> = self
			.channels
			.idle_snapshot()
			.into_iter()
			.filter(|(_id, idle_ms)| *idle_ms > idle_timeout_ms)
			.filter(|(id, _)| {
				let marker = format!("_{id}_");
				!active_session_ids.iter().any(|sid| sid.contains(&marker))
			})
			.map(|(id, _)| id)
			.collect();

		for id in &channels_to_close {
			self.channels.close(id);
		}

		let sessions_to_close = self.registry.with_sessions(|sessions| {
			sessions
				.iter()
				.filter(|s| {
					let idle = s.idle_for_ms();
					idle > idle_timeout_ms || (s.is_unauthenticated_ftp() && idle > idle_login_timeout_ms)
				})
				.cloned()
				.collect::<Vec<_>>()
		});

		for session in &sessions_to_close {
			session.disconnect("idle timeout");
		}

		IdleSweepReport {
			channels_closed: channels_to_close.len(),
			sessions_closed: sessions_to_close.len(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{IdleSweeper, IDLE_LOGIN_TIMEOUT};
	use crate::registry::{NoopAuditor, NoopMetricsSink, SessionRegistry};
	use crate::ssh_channel::{SshChannel, SshChannelTable};
	use crate::session::Session;
	use admission::NoopDefender;
	use hooks::{ActiveHookCounter, NoopPostDisconnectHook};
	use std::sync::Arc;
	use std::time::Duration;
	use supervisor_types::Protocol;
	use tokio_util::sync::CancellationToken;

	fn sweeper(idle_timeout: Duration) -> (IdleSweeper, Arc<SessionRegistry>, Arc<SshChannelTable>) {
		let registry = Arc::new(SessionRegistry::new(
			Arc::new(NoopDefender),
			Arc::new(NoopMetricsSink),
			Arc::new(NoopPostDisconnectHook),
			Arc::new(ActiveHookCounter::new()),
			Arc::new(NoopAuditor),
		));
		let channels = Arc::new(SshChannelTable::new());
		let sweeper = IdleSweeper::new(Arc::clone(&registry), Arc::clone(&channels), idle_timeout, Duration::from_secs(60), CancellationToken::new());
		(sweeper, registry, channels)
	}

	#[test]
	fn idle_session_beyond_timeout_is_closed() {
		let (sweeper, registry, _channels) = sweeper(Duration::from_millis(0));
		registry.add(Session::builder(Protocol::Sftp, "1.1.1.1:22").id("a").build()).unwrap();
		std::thread::sleep(Duration::from_millis(5));
		let report = sweeper.sweep_once();
		assert_eq!(report.sessions_closed, 1);
	}

	#[test]
	fn unauthenticated_ftp_uses_shorter_login_timeout() {
		assert_eq!(IDLE_LOGIN_TIMEOUT, Duration::from_secs(120));
	}

	#[test]
	fn ssh_channel_linked_to_active_session_is_spared() {
		// The channel's own last-activity goes stale past the threshold, but a still-active
		// linked session (S3: "last-activity 10s ago" against a 1 min timeout) keeps it open.
		let (sweeper, registry, channels) = sweeper(Duration::from_millis(3));
		channels.add(SshChannel::new("abc123"));
		std::thread::sleep(Duration::from_millis(8));
		registry.add(Session::builder(Protocol::Ssh, "1.1.1.1:22").id("session_abc123_1").build()).unwrap();
		let report = sweeper.sweep_once();
		assert_eq!(report.channels_closed, 0);
	}

	#[test]
	fn unlinked_ssh_channel_is_closed() {
		let (sweeper, _registry, channels) = sweeper(Duration::from_millis(0));
		channels.add(SshChannel::new("orphan"));
		std::thread::sleep(Duration::from_millis(5));
		let report = sweeper.sweep_once();
		assert_eq!(report.channels_closed, 1);
	}
}
