use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use supervisor_types::{Protocol, SupervisorError};

enum Outcome {
	Ready,
	Wait(Duration),
	Deny(Duration),
}

struct BucketState {
	tokens: f64,
	last_refill: Instant,
}

/// A single token bucket. Refill is elapsed-time based (tokens accrue continuously at
/// `refill_per_sec`), the way this workspace's other rate limiter computes its refill —
/// generalized here from a binary allow/deny check into one that can report how long a
/// caller would have to wait for the next token.
struct TokenBucket {
	max_tokens: f64,
	refill_per_sec: f64,
	max_delay: Duration,
	state: Mutex<BucketState>,
	last_used_ms: AtomicI64,
}

impl TokenBucket {
	fn new(max_tokens: u32, refill_period: Duration, max_delay: Duration) -> Self {
		let refill_per_sec = f64::from(max_tokens) / refill_period.as_secs_f64().max(0.001);
		Self {
			max_tokens: f64::from(max_tokens),
			refill_per_sec,
			max_delay,
			state: Mutex::new(BucketState {
				tokens: f64::from(max_tokens),
				last_refill: Instant::now(),
			}),
			last_used_ms: AtomicI64::new(now_ms()),
		}
	}

	fn poll(&self) -> Outcome {
		self.last_used_ms.store(now_ms(), Ordering::Relaxed);
		let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		let now = Instant::now();
		let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
		state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
		state.last_refill = now;

		if state.tokens >= 1.0 {
			state.tokens -= 1.0;
			return Outcome::Ready;
		}

		let deficit = 1.0 - state.tokens;
		let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
		if wait > self.max_delay {
			Outcome::Deny(wait)
		} else {
			Outcome::Wait(wait)
		}
	}

	fn force_consume(&self) {
		let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		state.tokens = (state.tokens - 1.0).max(0.0);
	}

	fn idle_for(&self) -> Duration {
		Duration::from_millis(u64::try_from((now_ms() - self.last_used_ms.load(Ordering::Relaxed)).max(0)).unwrap_or(u64::MAX))
	}
}

/// Wall-clock millis, the same idiom `session_core::session::now_millis` uses — a fresh
/// `Instant` has no usable history, so eviction needs a timestamp comparable across calls.
fn now_ms() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX)).unwrap_or_default()
}

enum BucketKind {
	Global(TokenBucket),
	PerSource { max_tokens: u32, refill_period: Duration, max_delay: Duration, buckets: DashMap<String, TokenBucket> },
}

/// Declarative configuration for one limiter in a protocol's ordered list (§3 Rate limiter).
pub struct LimiterConfig {
	pub max_tokens: u32,
	pub refill_period: Duration,
	pub max_delay: Duration,
	pub per_source: bool,
	pub allow_list: Vec<crate::allow_list::IpNetEntry>,
}

struct Limiter {
	allow_list: Vec<crate::allow_list::IpNetEntry>,
	kind: BucketKind,
	/// Open Question resolution (SPEC_FULL.md §9): per-source buckets are evicted when
	/// idle longer than this horizon, swept opportunistically on each `limit_rate` call.
	eviction_horizon: Duration,
}

impl Limiter {
	fn new(cfg: LimiterConfig) -> Self {
		let eviction_horizon = cfg.refill_period * 10;
		let kind = if cfg.per_source {
			BucketKind::PerSource {
				max_tokens: cfg.max_tokens,
				refill_period: cfg.refill_period,
				max_delay: cfg.max_delay,
				buckets: DashMap::new(),
			}
		} else {
			BucketKind::Global(TokenBucket::new(cfg.max_tokens, cfg.refill_period, cfg.max_delay))
		};
		Self {
			allow_list: cfg.allow_list,
			kind,
			eviction_horizon,
		}
	}

	fn is_allow_listed(&self, ip: &str) -> bool {
		std::net::IpAddr::from_str_opt(ip).is_some_and(|addr| self.allow_list.iter().any(|e| e.matches(addr)))
	}

	async fn acquire(&self, ip: &str) -> Result<(), (Duration, SupervisorError)> {
		if self.is_allow_listed(ip) {
			return Ok(());
		}
		match &self.kind {
			BucketKind::Global(bucket) => Self::drive(bucket).await,
			BucketKind::PerSource { max_tokens, refill_period, max_delay, buckets } => {
				self.evict_stale(buckets);
				let bucket = buckets.entry(ip.to_string()).or_insert_with(|| TokenBucket::new(*max_tokens, *refill_period, *max_delay));
				Self::drive(&bucket).await
			}
		}
	}

	fn evict_stale(&self, buckets: &DashMap<String, TokenBucket>) {
		buckets.retain(|_, bucket| bucket.idle_for() < self.eviction_horizon);
	}

	async fn drive(bucket: &TokenBucket) -> Result<(), (Duration, SupervisorError)> {
		match bucket.poll() {
			Outcome::Ready => Ok(()),
			Outcome::Deny(wait) => Err((wait, SupervisorError::GenericFailure(format!("rate limited, retry after {wait:?}")))),
			Outcome::Wait(wait) => {
				tokio::time::sleep(wait).await;
				bucket.force_consume();
				Ok(())
			}
		}
	}
}

trait IpAddrExt {
	fn from_str_opt(s: &str) -> Option<std::net::IpAddr>;
}

impl IpAddrExt for std::net::IpAddr {
	fn from_str_opt(s: &str) -> Option<Self> {
		use std::str::FromStr;
		Self::from_str(s).ok()
	}
}

/// `protocol -> [limiter...]`, built once at Initialize (§4.B).
pub struct RateLimiterRegistry {
	limiters: HashMap<Protocol, Vec<Limiter>>,
}

impl RateLimiterRegistry {
	#[must_use]
	pub fn new(by_protocol: HashMap<Protocol, Vec<LimiterConfig>>) -> Self {
		Self {
			limiters: by_protocol.into_iter().map(|(p, cfgs)| (p, cfgs.into_iter().map(Limiter::new).collect())).collect(),
		}
	}

	/// Iterates limiters for `protocol` in declared order; the first one that denies stops
	/// the iteration and surfaces its suggested delay (§4.B).
	pub async fn limit_rate(&self, protocol: Protocol, ip: &str) -> Result<(), (Duration, SupervisorError)> {
		let Some(limiters) = self.limiters.get(&protocol) else {
			return Ok(());
		};
		for limiter in limiters {
			limiter.acquire(ip).await?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::{BucketKind, Limiter, LimiterConfig, RateLimiterRegistry};
	use std::collections::HashMap;
	use std::time::Duration;
	use supervisor_types::Protocol;

	#[tokio::test]
	async fn idle_for_reflects_real_elapsed_time_not_a_fresh_instant() {
		let bucket = super::TokenBucket::new(5, Duration::from_secs(1), Duration::from_millis(50));
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(bucket.idle_for() >= Duration::from_millis(20));
	}

	#[tokio::test]
	async fn per_source_bucket_evicted_after_real_idle_time_passes() {
		let cfg = LimiterConfig {
			max_tokens: 5,
			refill_period: Duration::from_millis(5),
			max_delay: Duration::from_millis(50),
			per_source: true,
			allow_list: vec![],
		};
		let limiter = Limiter::new(cfg);
		limiter.acquire("1.2.3.4").await.unwrap();
		if let BucketKind::PerSource { buckets, .. } = &limiter.kind {
			assert_eq!(buckets.len(), 1);
		} else {
			panic!("expected per-source bucket kind");
		}

		tokio::time::sleep(Duration::from_millis(80)).await;
		limiter.acquire("5.6.7.8").await.unwrap();

		if let BucketKind::PerSource { buckets, .. } = &limiter.kind {
			assert!(!buckets.contains_key("1.2.3.4"));
			assert!(buckets.contains_key("5.6.7.8"));
		} else {
			panic!("expected per-source bucket kind");
		}
	}

	#[tokio::test]
	async fn empty_request_stream_passes_immediately() {
		let mut by_protocol = HashMap::new();
		by_protocol.insert(
			Protocol::Sftp,
			vec![LimiterConfig {
				max_tokens: 5,
				refill_period: Duration::from_secs(1),
				max_delay: Duration::from_millis(50),
				per_source: false,
				allow_list: vec![],
			}],
		);
		let registry = RateLimiterRegistry::new(by_protocol);
		let started = std::time::Instant::now();
		registry.limit_rate(Protocol::Sftp, "1.2.3.4").await.unwrap();
		assert!(started.elapsed() < Duration::from_secs(1));
	}

	#[tokio::test]
	async fn unconfigured_protocol_is_never_limited() {
		let registry = RateLimiterRegistry::new(HashMap::new());
		registry.limit_rate(Protocol::Ftp, "1.2.3.4").await.unwrap();
	}

	#[tokio::test]
	async fn exhausted_bucket_beyond_max_delay_is_denied() {
		let mut by_protocol = HashMap::new();
		by_protocol.insert(
			Protocol::Ftp,
			vec![LimiterConfig {
				max_tokens: 1,
				refill_period: Duration::from_secs(60),
				max_delay: Duration::from_millis(1),
				per_source: false,
				allow_list: vec![],
			}],
		);
		let registry = RateLimiterRegistry::new(by_protocol);
		registry.limit_rate(Protocol::Ftp, "1.2.3.4").await.unwrap();
		let result = registry.limit_rate(Protocol::Ftp, "1.2.3.4").await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn allow_listed_ip_bypasses_the_bucket() {
		let mut by_protocol = HashMap::new();
		by_protocol.insert(
			Protocol::Ftp,
			vec![LimiterConfig {
				max_tokens: 1,
				refill_period: Duration::from_secs(60),
				max_delay: Duration::from_millis(1),
				per_source: false,
				allow_list: vec![crate::allow_list::IpNetEntry::parse("1.2.3.4/32").unwrap()],
			}],
		);
		let registry = RateLimiterRegistry::new(by_protocol);
		registry.limit_rate(Protocol::Ftp, "1.2.3.4").await.unwrap();
		registry.limit_rate(Protocol::Ftp, "1.2.3.4").await.unwrap();
	}
}
