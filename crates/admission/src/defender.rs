use std::fmt;

use supervisor_types::SupervisorError;

/// Abuse-scoring events the core feeds to the defender (SPEC_FULL.md §4.C, §4.E).
/// Variant names match the literal event identifiers scenario S2 checks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefenderEvent {
	HostEventLoginFailed,
	HostEventNoLoginTried,
	HostEventLimitExceeded,
}

impl fmt::Display for DefenderEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::HostEventLoginFailed => "HostEventLoginFailed",
			Self::HostEventNoLoginTried => "HostEventNoLoginTried",
			Self::HostEventLimitExceeded => "HostEventLimitExceeded",
		};
		f.write_str(s)
	}
}

/// Opaque-to-the-core defender host record (§3): the core only ever passes these through.
#[derive(Debug, Clone)]
pub struct DefenderHostRecord {
	pub ip: String,
	pub score: i32,
	pub ban_time: Option<i64>,
}

/// The defender is pluggable (§4.C): when none is configured, every query returns a
/// neutral value and `add_event` is a no-op. `IsBanned` additionally consults a pluggable
/// IP-filter extension point in the facade, not in this trait itself.
pub trait Defender: Send + Sync {
	fn reload(&self) -> Result<(), SupervisorError>;
	fn is_banned(&self, ip: &str) -> bool;
	fn get_ban_time(&self, ip: &str) -> Option<i64>;
	fn get_hosts(&self) -> Vec<DefenderHostRecord>;
	fn get_host(&self, ip: &str) -> Option<DefenderHostRecord>;
	fn delete_host(&self, ip: &str) -> bool;
	fn get_score(&self, ip: &str) -> i32;
	fn add_event(&self, ip: &str, event: DefenderEvent);
}

/// The neutral defender used when no defender is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDefender;

impl Defender for NoopDefender {
	fn reload(&self) -> Result<(), SupervisorError> {
		Ok(())
	}

	fn is_banned(&self, _ip: &str) -> bool {
		false
	}

	fn get_ban_time(&self, _ip: &str) -> Option<i64> {
		None
	}

	fn get_hosts(&self) -> Vec<DefenderHostRecord> {
		Vec::new()
	}

	fn get_host(&self, _ip: &str) -> Option<DefenderHostRecord> {
		None
	}

	fn delete_host(&self, _ip: &str) -> bool {
		false
	}

	fn get_score(&self, _ip: &str) -> i32 {
		0
	}

	fn add_event(&self, _ip: &str, _event: DefenderEvent) {}
}

/// An optional extension point consulted by `is_banned` alongside the defender proper
/// (§4.C: "IsBanned additionally consults a pluggable IP-filter extension point").
pub trait IpFilter: Send + Sync {
	fn is_blocked(&self, ip: &str) -> bool;
}

/// The composed ban check the admission flow consults: the configured defender's own
/// verdict ORed with the optional IP-filter extension point, neither of which the other
/// knows about.
#[must_use]
pub fn is_banned(defender: &dyn Defender, ip_filter: Option<&dyn IpFilter>, ip: &str) -> bool {
	defender.is_banned(ip) || ip_filter.is_some_and(|f| f.is_blocked(ip))
}

#[cfg(test)]
mod tests {
	use super::{is_banned, Defender, DefenderEvent, IpFilter, NoopDefender};

	#[test]
	fn noop_defender_is_fully_neutral() {
		let d = NoopDefender;
		assert!(!d.is_banned("1.2.3.4"));
		assert_eq!(d.get_score("1.2.3.4"), 0);
		assert!(d.get_hosts().is_empty());
		d.add_event("1.2.3.4", DefenderEvent::HostEventNoLoginTried);
	}

	#[test]
	fn event_display_matches_literal_identifiers() {
		assert_eq!(DefenderEvent::HostEventNoLoginTried.to_string(), "HostEventNoLoginTried");
	}

	struct BlockEverything;

	impl IpFilter for BlockEverything {
		fn is_blocked(&self, _ip: &str) -> bool {
			true
		}
	}

	#[test]
	fn ip_filter_bans_even_when_the_defender_is_neutral() {
		let defender = NoopDefender;
		assert!(is_banned(&defender, Some(&BlockEverything), "1.2.3.4"));
		assert!(!is_banned(&defender, None, "1.2.3.4"));
	}
}
