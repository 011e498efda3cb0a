use std::fmt;

/// The closed set of protocol tags a session or hook invocation can carry.
///
/// Other subsystems must use these exact strings (the `Display`/`Serialize` impls below
/// are the only place that string is produced, so it can never drift).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Protocol {
	#[serde(rename = "SFTP")]
	Sftp,
	#[serde(rename = "SCP")]
	Scp,
	#[serde(rename = "SSH")]
	Ssh,
	#[serde(rename = "FTP")]
	Ftp,
	#[serde(rename = "DAV")]
	Dav,
	#[serde(rename = "HTTP")]
	Http,
	#[serde(rename = "HTTPShare")]
	HttpShare,
	#[serde(rename = "DataRetention")]
	DataRetention,
	#[serde(rename = "OIDC")]
	Oidc,
}

impl Protocol {
	/// The fixed disconnect-hook subset from SPEC_FULL.md §4.H / §6.
	#[must_use]
	pub const fn fires_disconnect_hook(self) -> bool {
		matches!(self, Self::Sftp | Self::Scp | Self::Ssh | Self::Ftp)
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Sftp => "SFTP",
			Self::Scp => "SCP",
			Self::Ssh => "SSH",
			Self::Ftp => "FTP",
			Self::Dav => "DAV",
			Self::Http => "HTTP",
			Self::HttpShare => "HTTPShare",
			Self::DataRetention => "DataRetention",
			Self::Oidc => "OIDC",
		}
	}
}

impl fmt::Display for Protocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disconnect_hook_subset_matches_spec() {
		for p in [Protocol::Sftp, Protocol::Scp, Protocol::Ssh, Protocol::Ftp] {
			assert!(p.fires_disconnect_hook());
		}
		for p in [Protocol::Dav, Protocol::Http, Protocol::HttpShare, Protocol::DataRetention, Protocol::Oidc] {
			assert!(!p.fires_disconnect_hook());
		}
	}

	#[test]
	fn display_strings_are_exact() {
		assert_eq!(Protocol::HttpShare.to_string(), "HTTPShare");
		assert_eq!(Protocol::Ftp.to_string(), "FTP");
	}

	#[test]
	fn serializes_to_exact_tag() {
		assert_eq!(serde_json::to_string(&Protocol::Sftp).unwrap(), "\"SFTP\"");
	}
}
