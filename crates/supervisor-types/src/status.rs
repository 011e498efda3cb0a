use crate::protocol::Protocol;
use serde::{Deserialize, Serialize};

/// Transfer type codes (bit-exact, SPEC_FULL.md §6): upload = 0, download = 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferType {
	Upload = 0,
	Download = 1,
}

impl TransferType {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Upload => "upload",
			Self::Download => "download",
		}
	}
}

/// Upload-mode codes (bit-exact, SPEC_FULL.md §6): 0 standard, 1 atomic, 2 atomic-with-resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum UploadMode {
	#[default]
	Standard = 0,
	Atomic = 1,
	AtomicWithResume = 2,
}

/// Stat flag bits (bit-exact, SPEC_FULL.md §6), combinable by bitwise OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatFlags(u8);

impl StatFlags {
	pub const UID_GID: Self = Self(1);
	pub const PERMS: Self = Self(2);
	pub const TIMES: Self = Self(4);
	pub const SIZE: Self = Self(8);

	#[must_use]
	pub const fn bits(self) -> u8 {
		self.0
	}

	#[must_use]
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}

	#[must_use]
	pub const fn union(self, other: Self) -> Self {
		Self(self.0 | other.0)
	}
}

impl std::ops::BitOr for StatFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		self.union(rhs)
	}
}

/// The stable JSON shape emitted for a live session (SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
	pub username: String,
	pub connection_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_version: Option<String>,
	pub remote_address: String,
	pub connection_time: i64,
	pub last_activity: i64,
	pub protocol: Protocol,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub active_transfers: Option<Vec<TransferStatus>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub command: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub node: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStatus {
	pub operation_type: String,
	pub start_time: i64,
	pub size: i64,
	pub path: String,
}

impl TransferStatus {
	#[must_use]
	pub fn new(kind: TransferType, start_time: i64, size: i64, path: impl Into<String>) -> Self {
		Self {
			operation_type: kind.as_str().to_string(),
			start_time,
			size,
			path: path.into(),
		}
	}
}
