use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::HookTarget;

/// Which lifecycle point invoked the hook — only `PostConnect` and `Startup` can deny;
/// `PostDisconnect` and `DataRetention` are logged-only (SPEC_FULL.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
	Startup,
	PostConnect,
	PostDisconnect,
	DataRetention,
}

impl HookKind {
	const fn denies_on_failure(self) -> bool {
		matches!(self, Self::Startup | Self::PostConnect)
	}
}

#[derive(Debug, Error)]
pub enum HookError {
	#[error("hook timed out after {0:?}")]
	Timeout(Duration),
	#[error("hook process exited with status {0}")]
	NonZeroExit(i32),
	#[error("hook http call returned status {0}")]
	NonSuccessStatus(u16),
	#[error("hook process failed to start: {0}")]
	Spawn(String),
	#[error("hook http call failed: {0}")]
	Http(String),
}

/// Tracked by I's `WaitForTransfers` to decide when it's safe to finish shutting down.
#[derive(Default)]
pub struct ActiveHookCounter {
	count: AtomicUsize,
}

impl ActiveHookCounter {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn current(&self) -> usize {
		self.count.load(Ordering::SeqCst)
	}

	/// Increments now and returns a guard that decrements on drop. Callers holding a
	/// detached task (e.g. a post-disconnect hook) must take this guard on their own task
	/// *before* spawning, then move it into the spawned future — incrementing inside the
	/// spawned task would let `WaitForTransfers` race past a hook that hasn't started yet
	/// (SPEC_FULL.md §9 "Hook concurrency").
	#[must_use]
	pub fn guard(self: &std::sync::Arc<Self>) -> ActiveHookGuard {
		self.count.fetch_add(1, Ordering::SeqCst);
		ActiveHookGuard(std::sync::Arc::clone(self))
	}
}

pub struct ActiveHookGuard(std::sync::Arc<ActiveHookCounter>);

impl Drop for ActiveHookGuard {
	fn drop(&mut self) {
		self.0.count.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Environment the core feeds to a hook invocation (SPEC_FULL.md §6 hook contracts).
#[derive(Debug, Clone)]
pub struct HookEnv {
	pub ip: String,
	pub username: String,
	pub duration_ms: i64,
	pub protocol: String,
}

impl HookEnv {
	fn as_pairs(&self) -> Vec<(&'static str, String)> {
		vec![
			("SFTPGO_CONNECTION_IP", self.ip.clone()),
			("SFTPGO_CONNECTION_USERNAME", self.username.clone()),
			("SFTPGO_CONNECTION_DURATION", self.duration_ms.to_string()),
			("SFTPGO_CONNECTION_PROTOCOL", self.protocol.clone()),
		]
	}
}

/// Executes one configured `HookTarget`. Does not itself track the active-hook counter —
/// callers take an `ActiveHookCounter::guard()` around the call (or, for detached
/// post-disconnect dispatch, before spawning the task that calls this).
pub struct HookRunner {
	http: reqwest::Client,
}

impl Default for HookRunner {
	fn default() -> Self {
		Self::new()
	}
}

impl HookRunner {
	#[must_use]
	pub fn new() -> Self {
		Self { http: reqwest::Client::new() }
	}

	/// Runs `target` under `kind`'s failure policy. Post-connect and startup hooks
	/// propagate a non-2xx/non-zero-exit result as denial; post-disconnect and
	/// data-retention hooks only log it.
	pub async fn run(&self, kind: HookKind, target: &HookTarget, env: &HookEnv) -> Result<(), HookError> {
		let result = self.run_inner(target, env).await;

		match &result {
			Ok(()) => {}
			Err(e) if kind.denies_on_failure() => {
				warn!(error = %e, ?kind, "hook denied the operation");
			}
			Err(e) => {
				debug!(error = %e, ?kind, "hook failed, ignored for this lifecycle point");
				return Ok(());
			}
		}
		result
	}

	async fn run_inner(&self, target: &HookTarget, env: &HookEnv) -> Result<(), HookError> {
		match target {
			HookTarget::Process { path, args, env: extra_env, timeout } => self.run_process(path, args, extra_env, *timeout, env).await,
			HookTarget::Http { url, timeout } => self.run_http(url, *timeout, env).await,
		}
	}

	async fn run_process(&self, path: &str, args: &[String], extra_env: &[(String, String)], timeout: Duration, env: &HookEnv) -> Result<(), HookError> {
		let mut cmd = Command::new(path);
		cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
		for (k, v) in env.as_pairs() {
			cmd.env(k, v);
		}
		for (k, v) in extra_env {
			cmd.env(k, v);
		}

		let child = cmd.spawn().map_err(|e| HookError::Spawn(e.to_string()))?;
		let status = tokio::time::timeout(timeout, child.wait_with_output()).await.map_err(|_| HookError::Timeout(timeout))?.map_err(|e| HookError::Spawn(e.to_string()))?;

		if status.status.success() {
			Ok(())
		} else {
			Err(HookError::NonZeroExit(status.status.code().unwrap_or(-1)))
		}
	}

	async fn run_http(&self, url: &str, timeout: Duration, env: &HookEnv) -> Result<(), HookError> {
		let request = self.http.get(url).timeout(timeout).query(&env.as_pairs());

		let response = request.send().await.map_err(|e| HookError::Http(e.to_string()))?;
		if response.status().is_success() {
			Ok(())
		} else {
			Err(HookError::NonSuccessStatus(response.status().as_u16()))
		}
	}
}
