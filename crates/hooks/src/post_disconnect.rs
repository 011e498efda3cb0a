use std::sync::Arc;

use async_trait::async_trait;
use supervisor_types::{ConnectionStatus, Protocol};
use tracing::warn;

use crate::config::HookTarget;
use crate::runner::{HookEnv, HookKind, HookRunner};

/// Dispatches the post-disconnect hook for a session that just left the registry
/// (SPEC_FULL.md §4.E Remove). Fire-and-forget by contract: implementors must not let a
/// failure propagate back to the caller.
#[async_trait]
pub trait PostDisconnectHook: Send + Sync {
	async fn dispatch(&self, protocol: Protocol, status: &ConnectionStatus);
}

/// Used when no post-disconnect hook target is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPostDisconnectHook;

#[async_trait]
impl PostDisconnectHook for NoopPostDisconnectHook {
	async fn dispatch(&self, _protocol: Protocol, _status: &ConnectionStatus) {}
}

/// Runs a configured hook target on every dispatch; errors are logged, never surfaced,
/// matching the post-disconnect failure policy in `HookRunner::run`.
pub struct ConfiguredPostDisconnectHook {
	runner: Arc<HookRunner>,
	target: HookTarget,
}

impl ConfiguredPostDisconnectHook {
	#[must_use]
	pub const fn new(runner: Arc<HookRunner>, target: HookTarget) -> Self {
		Self { runner, target }
	}
}

#[async_trait]
impl PostDisconnectHook for ConfiguredPostDisconnectHook {
	async fn dispatch(&self, protocol: Protocol, status: &ConnectionStatus) {
		let env = HookEnv {
			ip: status.remote_address.rsplit_once(':').map_or_else(|| status.remote_address.clone(), |(ip, _)| ip.to_string()),
			username: status.username.clone(),
			duration_ms: status.last_activity - status.connection_time,
			protocol: protocol.as_str().to_string(),
		};

		if let Err(e) = self.runner.run(HookKind::PostDisconnect, &self.target, &env).await {
			warn!(error = %e, connection_id = %status.connection_id, "post-disconnect hook failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{NoopPostDisconnectHook, PostDisconnectHook};
	use supervisor_types::{ConnectionStatus, Protocol};

	#[tokio::test]
	async fn noop_hook_never_panics_or_blocks() {
		let hook = NoopPostDisconnectHook;
		let status = ConnectionStatus {
			username: "bob".to_string(),
			connection_id: "c1".to_string(),
			client_version: None,
			remote_address: "1.2.3.4:22".to_string(),
			connection_time: 0,
			last_activity: 10,
			protocol: Protocol::Sftp,
			active_transfers: None,
			command: None,
			node: None,
		};
		hook.dispatch(Protocol::Sftp, &status).await;
	}
}
