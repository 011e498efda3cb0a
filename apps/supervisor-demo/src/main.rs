use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use hooks::{HookEnv, HookKind};
use quota::{OverquotaTransfer, TransferQuotaChecker};
use session_core::Session;
use supervisor::{Config, LogFormat, Supervisor};
use supervisor_types::Protocol;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{util::SubscriberInitExt, Layer};

/// Stand-in for the real quota backend a deployment would point at a database. Always
/// reports clean, so this binary exercises the sweep wiring without ever closing a transfer.
struct NeverOverquota;

#[async_trait]
impl TransferQuotaChecker for NeverOverquota {
	async fn update_transfer_current_sizes(&self, _uploaded: u64, _downloaded: u64, _transfer_id: i64, _conn_id: &str) {}

	async fn get_overquota_transfers(&self) -> Vec<OverquotaTransfer> {
		Vec::new()
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	let config = Config::new();
	init_tracing(&config);

	let config = Arc::new(config);
	let cancel_token = CancellationToken::new();
	let supervisor = Arc::new(Supervisor::build(Arc::clone(&config), Arc::new(NeverOverquota), None, None, None, cancel_token.clone()));

	run_startup_hook(&supervisor).await?;

	let background = supervisor.start_background();

	let signal_token = cancel_token.clone();
	tokio::spawn(async move {
		tokio::signal::ctrl_c().await.ok();
		tracing::info!("received Ctrl+C, initiating shutdown...");
		signal_token.cancel();
	});

	run_toy_session_lifecycle(&supervisor).await;

	cancel_token.cancelled().await;

	tracing::info!("starting cleanup...");
	match tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown()).await {
		Ok(()) => tracing::info!("graceful shutdown completed"),
		Err(_) => tracing::error!("shutdown timeout - forcing exit"),
	}

	for handle in background {
		let _ = handle.await;
	}

	tracing::info!("shutdown complete");
	Ok(())
}

/// Runs the configured startup hook, if any, and denies process startup on failure per
/// §4.H's failure policy for `HookKind::Startup`.
async fn run_startup_hook(supervisor: &Arc<Supervisor>) -> Result<()> {
	let Some(target) = supervisor.config.startup_hook.clone() else {
		return Ok(());
	};
	let env = HookEnv { ip: "0.0.0.0".to_string(), username: String::new(), duration_ms: 0, protocol: "startup".to_string() };
	if let Err(err) = supervisor.run_blocking_hook(HookKind::Startup, &target, &env).await {
		bail!("startup hook failed: {err}");
	}
	Ok(())
}

/// Accepts one connection, registers a session, lets it sit idle, then tears it down —
/// exercising Admission, the Session Registry, and disconnect release without standing up a
/// real protocol frontend.
async fn run_toy_session_lifecycle(supervisor: &Arc<Supervisor>) {
	let ip = "127.0.0.1:4022";
	if let Err(err) = supervisor.on_accept(ip) {
		tracing::warn!(%err, "demo connection denied at admission");
		return;
	}

	let session = Session::builder(Protocol::Sftp, ip).build();
	let id = match supervisor.register_session(session).await {
		Ok(session) => session.id().to_string(),
		Err(err) => {
			tracing::warn!(%err, "demo session registration failed");
			return;
		}
	};
	tracing::info!(session_id = %id, "demo session registered");

	tokio::time::sleep(Duration::from_millis(50)).await;

	supervisor.disconnect_session(&id, ip);
	tracing::info!(session_id = %id, "demo session disconnected");
}

fn init_tracing(config: &Config) {
	let filter = EnvFilter::from_str(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(match config.log_format {
			LogFormat::Json => Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>,
			LogFormat::Pretty => Box::new(tracing_subscriber::fmt::layer().event_format(tracing_subscriber::fmt::format().pretty()).with_filter(filter)),
		})
		.init();
}
