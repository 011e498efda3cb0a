use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Per-IP and total raw-TCP-client counts, tracked before authentication
/// (SPEC_FULL.md §4.A). A single mutex guards the per-IP map; the grand total is a
/// separate atomic so `total()` never has to take the map lock.
pub struct ClientCounter {
	per_ip: Mutex<HashMap<String, usize>>,
	total: AtomicUsize,
}

impl ClientCounter {
	#[must_use]
	pub fn new() -> Self {
		Self {
			per_ip: Mutex::new(HashMap::new()),
			total: AtomicUsize::new(0),
		}
	}

	pub fn add(&self, ip: &str) {
		let mut map = self.per_ip.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		*map.entry(ip.to_string()).or_insert(0) += 1;
		self.total.fetch_add(1, Ordering::SeqCst);
	}

	pub fn remove(&self, ip: &str) {
		let mut map = self.per_ip.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		if let Some(count) = map.get_mut(ip) {
			*count = count.saturating_sub(1);
			if *count == 0 {
				map.remove(ip);
			}
		}
		self.total.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1))).ok();
	}

	#[must_use]
	pub fn total_from(&self, ip: &str) -> usize {
		*self.per_ip.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(ip).unwrap_or(&0)
	}

	#[must_use]
	pub fn total(&self) -> usize {
		self.total.load(Ordering::SeqCst)
	}
}

impl Default for ClientCounter {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::ClientCounter;

	#[test]
	fn add_and_remove_are_symmetric() {
		let c = ClientCounter::new();
		c.add("1.2.3.4");
		c.add("1.2.3.4");
		c.add("5.6.7.8");
		assert_eq!(c.total_from("1.2.3.4"), 2);
		assert_eq!(c.total(), 3);

		c.remove("1.2.3.4");
		assert_eq!(c.total_from("1.2.3.4"), 1);
		c.remove("1.2.3.4");
		assert_eq!(c.total_from("1.2.3.4"), 0);
		assert_eq!(c.total(), 1);
	}

	#[test]
	fn remove_of_unknown_ip_does_not_underflow() {
		let c = ClientCounter::new();
		c.remove("9.9.9.9");
		assert_eq!(c.total(), 0);
		assert_eq!(c.total_from("9.9.9.9"), 0);
	}
}
