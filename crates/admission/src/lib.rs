//! Client Counter (A), Rate Limiter Registry (B), Allow-list & Defender Facade (C), and the
//! composite `Admission` decision.

pub mod allow_list;
pub mod client_counter;
pub mod decision;
pub mod defender;
pub mod rate_limiter;

pub use allow_list::{AllowList, IpNetEntry};
pub use client_counter::ClientCounter;
pub use decision::{is_new_connection_allowed, AdmissionContext};
pub use defender::{is_banned, Defender, DefenderEvent, DefenderHostRecord, IpFilter, NoopDefender};
pub use rate_limiter::{LimiterConfig, RateLimiterRegistry};
