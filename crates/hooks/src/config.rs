use std::time::Duration;

/// A configured hook target — either an absolute filesystem path invoked as a subprocess,
/// or an `http`/`https` URL invoked as a GET (SPEC_FULL.md §4.H).
#[derive(Debug, Clone)]
pub enum HookTarget {
	Process { path: String, args: Vec<String>, env: Vec<(String, String)>, timeout: Duration },
	Http { url: String, timeout: Duration },
}

impl HookTarget {
	#[must_use]
	pub fn from_target_string(target: &str, timeout: Duration) -> Self {
		if target.starts_with("http") {
			Self::Http { url: target.to_string(), timeout }
		} else {
			Self::Process {
				path: target.to_string(),
				args: Vec::new(),
				env: Vec::new(),
				timeout,
			}
		}
	}
}
