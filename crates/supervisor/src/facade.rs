use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use admission::{AdmissionContext, AllowList, ClientCounter, Defender, IpFilter, IpNetEntry, LimiterConfig, NoopDefender, RateLimiterRegistry};
use hooks::{ActiveHookCounter, ConfiguredPostDisconnectHook, HookEnv, HookError, HookKind, HookRunner, HookTarget, NoopPostDisconnectHook, PostDisconnectHook};
use quota::{QuotaSweeper, TransferQuotaChecker};
use session_core::{IdleSweeper, MetricsSink, NoopAuditor, NoopMetricsSink, ScanRegistries, Session, SessionRegistry, SshChannelTable};
use supervisor_types::{Protocol, SupervisorError};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::shutdown::ShutdownCoordinator;

const ALL_PROTOCOLS: [Protocol; 9] = [
	Protocol::Sftp,
	Protocol::Scp,
	Protocol::Ssh,
	Protocol::Ftp,
	Protocol::Dav,
	Protocol::Http,
	Protocol::HttpShare,
	Protocol::DataRetention,
	Protocol::Oidc,
];

/// The facade composing every component behind one explicit handle, in the spirit of this
/// workspace's `AppState::build` (one place that constructs the whole universe). Unlike the
/// teacher's axum-bound `AppState`, there is only one protocol-agnostic surface here, so the
/// core/external/realtime three-way split collapses into a single struct.
pub struct Supervisor {
	pub config: Arc<Config>,
	pub sessions: Arc<SessionRegistry>,
	pub ssh_channels: Arc<SshChannelTable>,
	pub scans: Arc<ScanRegistries>,
	pub client_counter: Arc<ClientCounter>,
	pub allow_list: Arc<AllowList>,
	pub defender: Arc<dyn Defender>,
	pub ip_filter: Option<Arc<dyn IpFilter>>,
	pub rate_limiter: Arc<RateLimiterRegistry>,
	pub hook_runner: Arc<HookRunner>,
	pub active_hooks: Arc<ActiveHookCounter>,
	pub quota: Arc<QuotaSweeper>,
	pub shutdown: Arc<ShutdownCoordinator>,
	pub cancel_token: CancellationToken,
}

impl Supervisor {
	/// Builds the whole supervisor from a configuration snapshot plus the external
	/// collaborators this core cannot provide itself: the transfer quota checker (§4.F), an
	/// optional defender (§4.C, neutral when `None`), and an optional IP-filter extension
	/// point ORed into every ban check alongside it (§4.C).
	#[must_use]
	pub fn build(
		config: Arc<Config>,
		quota_checker: Arc<dyn TransferQuotaChecker>,
		defender: Option<Arc<dyn Defender>>,
		ip_filter: Option<Arc<dyn IpFilter>>,
		metrics: Option<Arc<dyn MetricsSink>>,
		cancel_token: CancellationToken,
	) -> Self {
		let active_hooks = Arc::new(ActiveHookCounter::new());
		let hook_runner = Arc::new(HookRunner::new());
		let post_disconnect_hook = Self::build_post_disconnect_hook(&config, &hook_runner);
		let defender = defender.unwrap_or_else(|| Arc::new(NoopDefender) as Arc<dyn Defender>);
		let metrics = metrics.unwrap_or_else(|| Arc::new(NoopMetricsSink) as Arc<dyn MetricsSink>);

		let sessions = Arc::new(SessionRegistry::new(Arc::clone(&defender), metrics, post_disconnect_hook, Arc::clone(&active_hooks), Arc::new(NoopAuditor)));
		let ssh_channels = Arc::new(SshChannelTable::new());
		let scans = Arc::new(ScanRegistries::default());
		let client_counter = Arc::new(ClientCounter::new());

		let allow_list = Arc::new(if let Some(path) = &config.whitelist_file {
			let entries = Self::load_allow_list_file(path);
			let list = AllowList::unconfigured();
			let _ = list.reload(Some(entries));
			list
		} else {
			AllowList::unconfigured()
		});

		let rate_limiter = Arc::new(Self::build_rate_limiter(&config));
		let quota = Arc::new(QuotaSweeper::new(Arc::clone(&sessions), quota_checker));
		let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&active_hooks), Arc::clone(&sessions)));

		Self {
			config,
			sessions,
			ssh_channels,
			scans,
			client_counter,
			allow_list,
			defender,
			ip_filter,
			rate_limiter,
			hook_runner,
			active_hooks,
			quota,
			shutdown,
			cancel_token,
		}
	}

	fn build_post_disconnect_hook(config: &Config, runner: &Arc<HookRunner>) -> Arc<dyn PostDisconnectHook> {
		config.post_disconnect_hook.as_ref().map_or_else(
			|| Arc::new(NoopPostDisconnectHook) as Arc<dyn PostDisconnectHook>,
			|target| {
				Arc::new(ConfiguredPostDisconnectHook::new(Arc::clone(runner), HookTarget::from_target_string(target, config.hook_timeout))) as Arc<dyn PostDisconnectHook>
			},
		)
	}

	fn load_allow_list_file(path: &str) -> Vec<IpNetEntry> {
		let Ok(contents) = std::fs::read_to_string(path) else {
			tracing::warn!(path, "could not read allow-list file, treating as empty");
			return Vec::new();
		};
		contents
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty() && !line.starts_with('#'))
			.filter_map(|line| IpNetEntry::parse(line).ok())
			.collect()
	}

	/// A single configured limiter is applied uniformly to every protocol (Open Question:
	/// SPEC_FULL.md gives no per-protocol CLI shape for rate-limiter configs; see
	/// DESIGN.md for why one shared limiter is the documented simplification here).
	fn build_rate_limiter(config: &Config) -> RateLimiterRegistry {
		let mut by_protocol = HashMap::new();
		if config.rate_limit_max_tokens > 0 {
			for protocol in ALL_PROTOCOLS {
				by_protocol.insert(
					protocol,
					vec![LimiterConfig {
						max_tokens: config.rate_limit_max_tokens,
						refill_period: config.rate_limit_refill_period,
						max_delay: config.rate_limit_max_delay,
						per_source: config.rate_limit_per_source,
						allow_list: Vec::new(),
					}],
				);
			}
		}
		RateLimiterRegistry::new(by_protocol)
	}

	/// Client Counter.add followed by the composite Admission decision, the control flow
	/// §2's "a protocol frontend calls Client Counter.add on accept, then Admission"
	/// describes. On denial the caller's accepted socket should be torn down without ever
	/// registering a session.
	pub fn on_accept(&self, ip: &str) -> Result<(), SupervisorError> {
		self.client_counter.add(ip);
		let ctx = AdmissionContext {
			shutting_down: self.shutdown.is_shutting_down(),
			allow_list: &self.allow_list,
			client_counter: &self.client_counter,
			defender: self.defender.as_ref(),
			ip_filter: self.ip_filter.as_deref(),
			per_host_cap: self.config.max_per_host_connections,
			total_cap: self.config.max_total_connections,
			logical_session_count: self.sessions.get_stats("").total,
		};
		let result = admission::is_new_connection_allowed(ip, &ctx);
		if result.is_err() {
			self.client_counter.remove(ip);
		}
		result
	}

	/// Rate-limits the session's protocol/ip pair, runs the configured post-connect hook
	/// (deny-on-failure per §4.H), then registers it in E — "E consults B for rate limiting"
	/// (§2 control flow).
	pub async fn register_session(&self, session: Session) -> Result<Arc<Session>, SupervisorError> {
		let protocol = session.protocol();
		let ip = session.remote_ip().to_string();
		if let Err((_delay, err)) = self.rate_limiter.limit_rate(protocol, &ip).await {
			return Err(err);
		}
		if let Some(target) = &self.config.post_connect_hook {
			let env = HookEnv { ip: ip.clone(), username: session.username().to_string(), duration_ms: 0, protocol: protocol.as_str().to_string() };
			if let Err(err) = self.run_blocking_hook(HookKind::PostConnect, target, &env).await {
				return Err(SupervisorError::ConnectionDenied(format!("post-connect hook failed: {err}")));
			}
		}
		self.sessions.add(session)
	}

	/// E.Remove already fires the post-disconnect hook; this additionally releases the raw
	/// client-counter slot A owns, per §2's "On disconnect, E releases counts in A".
	pub fn disconnect_session(&self, id: &str, ip: &str) -> bool {
		let removed = self.sessions.remove(id);
		if removed {
			self.client_counter.remove(ip);
		}
		removed
	}

	/// Runs a startup or post-connect hook, blocking the caller and denying on failure per
	/// §4.H's failure policy for those two kinds.
	pub async fn run_blocking_hook(&self, kind: HookKind, target: &str, env: &HookEnv) -> Result<(), HookError> {
		let hook_target = HookTarget::from_target_string(target, self.config.hook_timeout);
		let guard = self.active_hooks.guard();
		let result = self.hook_runner.run(kind, &hook_target, env).await;
		drop(guard);
		result
	}

	/// Starts the Scheduler's jobs (§4.J): the transfer sweep always, the idle sweep only
	/// when the configured timeout is non-zero.
	pub fn start_background(&self) -> Vec<tokio::task::JoinHandle<()>> {
		let idle = (self.config.idle_timeout_minutes > 0).then(|| {
			IdleSweeper::new(
				Arc::clone(&self.sessions),
				Arc::clone(&self.ssh_channels),
				Duration::from_secs(self.config.idle_timeout_minutes * 60),
				self.config.sweep_base_interval * self.config.idle_sweep_multiplier,
				self.cancel_token.clone(),
			)
		});
		let scheduler = Scheduler::new(Arc::clone(&self.quota), idle, self.config.sweep_base_interval, self.cancel_token.clone());
		scheduler.start()
	}

	/// Drives graceful shutdown to completion (§4.I), then cancels every background task.
	pub async fn shutdown(&self) {
		self.shutdown.wait_for_transfers(self.config.shutdown_grace_seconds).await;
		self.cancel_token.cancel();
	}
}
