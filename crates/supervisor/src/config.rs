use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use supervisor_types::UploadMode;

/// CLI/env-facing mirror of `supervisor_types::UploadMode` (SPEC_FULL.md §3 Configuration
/// snapshot). Kept separate from the wire-shaped type so the foundational `supervisor-types`
/// crate never has to depend on `clap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[value(rename_all = "kebab-case")]
pub enum UploadModeArg {
	Standard,
	Atomic,
	AtomicWithResume,
}

impl From<UploadModeArg> for UploadMode {
	fn from(value: UploadModeArg) -> Self {
		match value {
			UploadModeArg::Standard => Self::Standard,
			UploadModeArg::Atomic => Self::Atomic,
			UploadModeArg::AtomicWithResume => Self::AtomicWithResume,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[value(rename_all = "kebab-case")]
pub enum SetstatMode {
	Normal,
	Ignore,
	IgnoreCloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[value(rename_all = "kebab-case")]
pub enum ProxyProtocolMode {
	Disabled,
	Optional,
	Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[value(rename_all = "kebab-case")]
pub enum LogFormat {
	Pretty,
	Json,
}

/// Process-wide configuration snapshot (SPEC_FULL.md §3). Installed once at Initialize and
/// read thereafter without locking — there is deliberately no setter on any field; a fresh
/// `Config` is the only way to change one, matching "re-Initialization is not supported
/// while sessions exist".
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "IDLE_TIMEOUT_MINUTES", default_value = "0", help = "Idle timeout in minutes, 0 disables the idle sweep")]
	pub idle_timeout_minutes: u64,

	#[arg(long, env = "UPLOAD_MODE", value_enum, default_value = "standard")]
	pub upload_mode: UploadModeArg,

	#[arg(long, env = "SETSTAT_MODE", value_enum, default_value = "normal")]
	pub setstat_mode: SetstatMode,

	#[arg(long, env = "TEMP_PATH", default_value = "/tmp")]
	pub temp_path: String,

	#[arg(long, env = "PROXY_PROTOCOL", value_enum, default_value = "disabled")]
	pub proxy_protocol: ProxyProtocolMode,

	#[arg(long, env = "PROXY_ALLOWED", value_delimiter = ',', default_value = "")]
	pub proxy_allowed: Vec<String>,

	#[arg(long, env = "STARTUP_HOOK")]
	pub startup_hook: Option<String>,

	#[arg(long, env = "POST_CONNECT_HOOK")]
	pub post_connect_hook: Option<String>,

	#[arg(long, env = "POST_DISCONNECT_HOOK")]
	pub post_disconnect_hook: Option<String>,

	#[arg(long, env = "DATA_RETENTION_HOOK")]
	pub data_retention_hook: Option<String>,

	#[arg(long, env = "HOOK_TIMEOUT_SECS", default_value = "30", value_parser = parse_duration)]
	pub hook_timeout: Duration,

	#[arg(long, env = "MAX_TOTAL_CONNECTIONS", default_value = "0", help = "0 means unlimited")]
	pub max_total_connections: usize,

	#[arg(long, env = "MAX_PER_HOST_CONNECTIONS", default_value = "0", help = "0 means unlimited")]
	pub max_per_host_connections: usize,

	#[arg(long, env = "WHITELIST_FILE")]
	pub whitelist_file: Option<String>,

	#[arg(long, env = "ALLOW_SELF_CONNECTIONS", default_value = "false")]
	pub allow_self_connections: bool,

	#[arg(long, env = "DEFENDER_ENABLED", default_value = "false")]
	pub defender_enabled: bool,

	#[arg(long, env = "RATE_LIMIT_MAX_TOKENS", default_value = "0", help = "0 disables rate limiting entirely")]
	pub rate_limit_max_tokens: u32,

	#[arg(long, env = "RATE_LIMIT_REFILL_SECS", default_value = "1", value_parser = parse_duration)]
	pub rate_limit_refill_period: Duration,

	#[arg(long, env = "RATE_LIMIT_MAX_DELAY_SECS", default_value = "1", value_parser = parse_duration)]
	pub rate_limit_max_delay: Duration,

	#[arg(long, env = "RATE_LIMIT_PER_SOURCE", default_value = "true")]
	pub rate_limit_per_source: bool,

	// Ambient fields: not in the distilled data model, needed to run a real deployment.
	#[arg(long, env = "LOG_FILTER", default_value = "info")]
	pub log_filter: String,

	#[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
	pub log_format: LogFormat,

	#[arg(long, env = "SWEEP_BASE_INTERVAL_SECS", default_value = "60", value_parser = parse_duration)]
	pub sweep_base_interval: Duration,

	#[arg(long, env = "IDLE_SWEEP_MULTIPLIER", default_value = "3")]
	pub idle_sweep_multiplier: u32,

	#[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "10")]
	pub shutdown_grace_seconds: u64,
}

impl Config {
	#[must_use]
	pub fn new() -> Self {
		Self::parse()
	}

	/// Config constructed without touching argv or the process environment, for tests and
	/// for embedding a default instance when no CLI parsing happened (SPEC_FULL.md §2.1).
	#[cfg(test)]
	#[must_use]
	pub fn test() -> Self {
		Self {
			idle_timeout_minutes: 0,
			upload_mode: UploadModeArg::Standard,
			setstat_mode: SetstatMode::Normal,
			temp_path: "/tmp".to_string(),
			proxy_protocol: ProxyProtocolMode::Disabled,
			proxy_allowed: Vec::new(),
			startup_hook: None,
			post_connect_hook: None,
			post_disconnect_hook: None,
			data_retention_hook: None,
			hook_timeout: Duration::from_secs(5),
			max_total_connections: 0,
			max_per_host_connections: 0,
			whitelist_file: None,
			allow_self_connections: false,
			defender_enabled: false,
			rate_limit_max_tokens: 0,
			rate_limit_refill_period: Duration::from_secs(1),
			rate_limit_max_delay: Duration::from_millis(100),
			rate_limit_per_source: true,
			log_filter: "info".to_string(),
			log_format: LogFormat::Pretty,
			sweep_base_interval: Duration::from_secs(1),
			idle_sweep_multiplier: 3,
			shutdown_grace_seconds: 1,
		}
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}
