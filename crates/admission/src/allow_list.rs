use std::net::IpAddr;
use std::str::FromStr;
use std::sync::RwLock;

use supervisor_types::SupervisorError;

/// A single IP or CIDR entry loaded from the allow-list file.
#[derive(Debug, Clone, Copy)]
pub struct IpNetEntry {
	addr: IpAddr,
	prefix_len: u32,
}

impl IpNetEntry {
	pub fn parse(s: &str) -> Result<Self, SupervisorError> {
		let (addr_part, prefix_part) = s.split_once('/').map_or((s, None), |(a, p)| (a, Some(p)));
		let addr = IpAddr::from_str(addr_part).map_err(|e| SupervisorError::GenericFailure(format!("invalid allow-list entry {s:?}: {e}")))?;
		let max_len = match addr {
			IpAddr::V4(_) => 32,
			IpAddr::V6(_) => 128,
		};
		let prefix_len = match prefix_part {
			None => max_len,
			Some(p) => p.parse::<u32>().map_err(|e| SupervisorError::GenericFailure(format!("invalid prefix length in {s:?}: {e}")))?,
		};
		if prefix_len > max_len {
			return Err(SupervisorError::GenericFailure(format!("prefix length {prefix_len} out of range for {s:?}")));
		}
		Ok(Self { addr, prefix_len })
	}

	#[must_use]
	pub fn matches(&self, ip: IpAddr) -> bool {
		match (self.addr, ip) {
			(IpAddr::V4(net), IpAddr::V4(candidate)) => {
				let mask = mask32(self.prefix_len);
				u32::from(net) & mask == u32::from(candidate) & mask
			}
			(IpAddr::V6(net), IpAddr::V6(candidate)) => {
				let mask = mask128(self.prefix_len);
				u128::from(net) & mask == u128::from(candidate) & mask
			}
			_ => false,
		}
	}
}

const fn mask32(prefix_len: u32) -> u32 {
	if prefix_len == 0 {
		0
	} else {
		u32::MAX << (32 - prefix_len)
	}
}

const fn mask128(prefix_len: u32) -> u128 {
	if prefix_len == 0 {
		0
	} else {
		u128::MAX << (128 - prefix_len)
	}
}

/// Loaded once from a file of IPs/CIDRs, `reload()`-able under a write lock
/// (SPEC_FULL.md §4.C). `None` means "not configured": every connection is allowed through
/// the allow-list stage. `Some(vec![])` is a configured-but-empty list, which denies
/// everything — a real, if unusual, operator configuration, not the same as unconfigured.
pub struct AllowList {
	entries: RwLock<Option<Vec<IpNetEntry>>>,
}

impl AllowList {
	#[must_use]
	pub fn unconfigured() -> Self {
		Self { entries: RwLock::new(None) }
	}

	/// Replaces the active list. Rejects a missing/unparseable list rather than leaving
	/// stale entries in place — "a nil parsed list on reload is rejected" (§4.C).
	pub fn reload(&self, entries: Option<Vec<IpNetEntry>>) -> Result<(), SupervisorError> {
		let entries = entries.ok_or_else(|| SupervisorError::GenericFailure("allow-list reload received no parsed entries".to_string()))?;
		*self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(entries);
		Ok(())
	}

	#[must_use]
	pub fn is_configured(&self) -> bool {
		self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner).is_some()
	}

	#[must_use]
	pub fn is_allowed(&self, ip: &str) -> bool {
		let guard = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
		match guard.as_ref() {
			None => true,
			Some(entries) => IpAddr::from_str(ip).is_ok_and(|candidate| entries.iter().any(|e| e.matches(candidate))),
		}
	}
}

impl Default for AllowList {
	fn default() -> Self {
		Self::unconfigured()
	}
}

#[cfg(test)]
mod tests {
	use super::{AllowList, IpNetEntry};

	#[test]
	fn unconfigured_allows_everything() {
		let list = AllowList::unconfigured();
		assert!(list.is_allowed("192.168.1.1"));
		assert!(!list.is_configured());
	}

	#[test]
	fn cidr_entry_matches_subnet_only() {
		let list = AllowList::unconfigured();
		list.reload(Some(vec![IpNetEntry::parse("10.0.0.0/24").unwrap()])).unwrap();
		assert!(list.is_configured());
		assert!(list.is_allowed("10.0.0.42"));
		assert!(!list.is_allowed("192.168.1.1"));
	}

	#[test]
	fn reload_with_none_is_rejected() {
		let list = AllowList::unconfigured();
		assert!(list.reload(None).is_err());
		assert!(!list.is_configured());
	}

	#[test]
	fn configured_empty_list_denies_everything() {
		let list = AllowList::unconfigured();
		list.reload(Some(vec![])).unwrap();
		assert!(list.is_configured());
		assert!(!list.is_allowed("1.2.3.4"));
	}
}
