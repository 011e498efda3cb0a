use supervisor_types::SupervisorError;

use crate::allow_list::AllowList;
use crate::client_counter::ClientCounter;
use crate::defender::{is_banned, Defender, DefenderEvent, IpFilter};

/// Bundles everything `is_new_connection_allowed` needs to evaluate the admission
/// precedence chain (SPEC_FULL.md §4 Admission composite) without owning any of it.
/// `per_host_cap`/`total_cap` of zero mean "unlimited", per the spec's "if cap > 0" guards.
pub struct AdmissionContext<'a> {
	pub shutting_down: bool,
	pub allow_list: &'a AllowList,
	pub client_counter: &'a ClientCounter,
	pub defender: &'a dyn Defender,
	pub ip_filter: Option<&'a dyn IpFilter>,
	pub per_host_cap: usize,
	pub total_cap: usize,
	pub logical_session_count: usize,
}

/// The composite decision a new raw connection is subjected to, in the exact order given
/// by the spec: shutdown, allow-list, ban check, per-host cap, total raw-client cap,
/// logical-session cap (reusing `total_cap`). The first failing check short-circuits; none
/// of the later checks run. Note the asymmetric comparisons: raw-client counts use strict
/// `>` because the current connection is already counted by the time this runs; the
/// logical-session count uses `>=` because it is not yet inserted.
pub fn is_new_connection_allowed(ip: &str, ctx: &AdmissionContext<'_>) -> Result<(), SupervisorError> {
	if ctx.shutting_down {
		return Err(SupervisorError::ShuttingDown);
	}

	if ctx.allow_list.is_configured() && !ctx.allow_list.is_allowed(ip) {
		return Err(SupervisorError::ConnectionDenied(format!("{ip} is not in the allow list")));
	}

	if is_banned(ctx.defender, ctx.ip_filter, ip) {
		return Err(SupervisorError::ConnectionDenied(format!("{ip} is banned")));
	}

	let per_host = ctx.client_counter.total_from(ip);
	if ctx.per_host_cap > 0 && per_host > ctx.per_host_cap {
		ctx.defender.add_event(ip, DefenderEvent::HostEventLimitExceeded);
		return Err(SupervisorError::ConnectionDenied(format!("too many connections from {ip}: {per_host}/{}", ctx.per_host_cap)));
	}

	if ctx.total_cap > 0 {
		let total = ctx.client_counter.total();
		if total > ctx.total_cap {
			return Err(SupervisorError::ConnectionDenied(format!("too many open connections: {total}/{}", ctx.total_cap)));
		}

		if ctx.logical_session_count >= ctx.total_cap {
			return Err(SupervisorError::too_many_open_sessions(ctx.logical_session_count, ctx.total_cap));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::{is_new_connection_allowed, AdmissionContext};
	use crate::allow_list::{AllowList, IpNetEntry};
	use crate::client_counter::ClientCounter;
	use crate::defender::NoopDefender;

	fn base_ctx<'a>(allow_list: &'a AllowList, client_counter: &'a ClientCounter, defender: &'a NoopDefender) -> AdmissionContext<'a> {
		AdmissionContext {
			shutting_down: false,
			allow_list,
			client_counter,
			defender,
			ip_filter: None,
			per_host_cap: 5,
			total_cap: 100,
			logical_session_count: 0,
		}
	}

	#[test]
	fn shutting_down_denies_before_any_other_check() {
		let allow_list = AllowList::unconfigured();
		let counter = ClientCounter::new();
		let defender = NoopDefender;
		let mut ctx = base_ctx(&allow_list, &counter, &defender);
		ctx.shutting_down = true;
		assert!(matches!(is_new_connection_allowed("1.2.3.4", &ctx), Err(supervisor_types::SupervisorError::ShuttingDown)));
	}

	#[test]
	fn allow_list_denial_takes_precedence_over_caps() {
		let allow_list = AllowList::unconfigured();
		allow_list.reload(Some(vec![IpNetEntry::parse("10.0.0.0/24").unwrap()])).unwrap();
		let counter = ClientCounter::new();
		let defender = NoopDefender;
		let ctx = base_ctx(&allow_list, &counter, &defender);
		assert!(is_new_connection_allowed("192.168.1.1", &ctx).is_err());
	}

	#[test]
	fn ip_filter_denies_even_when_the_defender_is_neutral() {
		use crate::defender::IpFilter;

		struct BlockEverything;
		impl IpFilter for BlockEverything {
			fn is_blocked(&self, _ip: &str) -> bool {
				true
			}
		}

		let allow_list = AllowList::unconfigured();
		let counter = ClientCounter::new();
		let defender = NoopDefender;
		let mut ctx = base_ctx(&allow_list, &counter, &defender);
		ctx.ip_filter = Some(&BlockEverything);
		assert!(is_new_connection_allowed("1.2.3.4", &ctx).is_err());
	}

	#[test]
	fn per_host_cap_uses_strict_greater_than() {
		let allow_list = AllowList::unconfigured();
		let counter = ClientCounter::new();
		for _ in 0..5 {
			counter.add("1.2.3.4");
		}
		let defender = NoopDefender;
		let ctx = base_ctx(&allow_list, &counter, &defender);
		assert!(is_new_connection_allowed("1.2.3.4", &ctx).is_ok());
		counter.add("1.2.3.4");
		assert!(is_new_connection_allowed("1.2.3.4", &ctx).is_err());
	}

	#[test]
	fn zero_per_host_cap_means_unlimited() {
		let allow_list = AllowList::unconfigured();
		let counter = ClientCounter::new();
		for _ in 0..50 {
			counter.add("1.2.3.4");
		}
		let defender = NoopDefender;
		let mut ctx = base_ctx(&allow_list, &counter, &defender);
		ctx.per_host_cap = 0;
		assert!(is_new_connection_allowed("1.2.3.4", &ctx).is_ok());
	}

	#[test]
	fn logical_session_cap_uses_greater_or_equal_and_reuses_total_cap() {
		let allow_list = AllowList::unconfigured();
		let counter = ClientCounter::new();
		let defender = NoopDefender;
		let mut ctx = base_ctx(&allow_list, &counter, &defender);
		ctx.total_cap = 10;
		ctx.logical_session_count = 10;
		let err = is_new_connection_allowed("1.2.3.4", &ctx).unwrap_err();
		assert_eq!(err.to_string(), "too many open sessions: 10/10");
	}

	#[test]
	fn under_every_cap_is_admitted() {
		let allow_list = AllowList::unconfigured();
		let counter = ClientCounter::new();
		counter.add("1.2.3.4");
		let defender = NoopDefender;
		let ctx = base_ctx(&allow_list, &counter, &defender);
		assert!(is_new_connection_allowed("1.2.3.4", &ctx).is_ok());
	}
}
