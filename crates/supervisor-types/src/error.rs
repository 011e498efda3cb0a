/// The closed set of failures the supervisor ever returns to a protocol frontend.
///
/// Every terminal rejection carries exactly one of these variants so the protocol layer
/// can map it to a protocol-specific status code. There is deliberately no catch-all
/// `#[from]` wildcard here: each producing component picks the variant that matches its
/// own failure, the way the rest of this codebase's closed error enums work.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
	#[error("permission denied")]
	PermissionDenied,

	#[error("no such file or directory")]
	NotExist,

	#[error("operation unsupported")]
	OpUnsupported,

	#[error("{0}")]
	GenericFailure(String),

	#[error("{0}")]
	QuotaExceeded(String),

	#[error("{0}")]
	ReadQuotaExceeded(String),

	#[error("{0}")]
	ConnectionDenied(String),

	#[error("no binding found for the requested connection")]
	NoBinding,

	#[error("client certificate has been revoked")]
	CrtRevoked,

	#[error("no credentials provided")]
	NoCredentials,

	#[error("internal failure: {0}")]
	InternalFailure(String),

	#[error("transfer aborted")]
	TransferAborted,

	#[error("the service is shutting down")]
	ShuttingDown,
}

impl SupervisorError {
	#[must_use]
	pub fn quota_exceeded(transfer_id: i64) -> Self {
		Self::QuotaExceeded(format!("transfer {transfer_id}: quota exceeded"))
	}

	#[must_use]
	pub fn read_quota_exceeded(transfer_id: i64) -> Self {
		Self::ReadQuotaExceeded(format!("transfer {transfer_id}: read quota exceeded"))
	}

	#[must_use]
	pub fn too_many_open_sessions(current: usize, cap: usize) -> Self {
		Self::ConnectionDenied(format!("too many open sessions: {current}/{cap}"))
	}

	/// `true` for the variants that must abort a login attempt outright (as opposed to
	/// being logged and otherwise ignored, e.g. a post-disconnect hook failure).
	#[must_use]
	pub const fn is_fatal_to_login(&self) -> bool {
		!matches!(self, Self::InternalFailure(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn too_many_open_sessions_matches_s1_literal() {
		let err = SupervisorError::too_many_open_sessions(2, 2);
		assert_eq!(err.to_string(), "too many open sessions: 2/2");
	}

	#[test]
	fn quota_messages_distinguish_upload_and_download() {
		assert_ne!(SupervisorError::quota_exceeded(7).to_string(), SupervisorError::read_quota_exceeded(7).to_string());
	}

	#[test]
	fn shutting_down_display_is_stable() {
		assert_eq!(SupervisorError::ShuttingDown.to_string(), "the service is shutting down");
	}
}
