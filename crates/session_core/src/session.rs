use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use supervisor_types::{ConnectionStatus, Protocol, SupervisorError, TransferStatus, TransferType};

pub(crate) fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX)).unwrap_or_default()
}

/// Schedules a non-blocking disconnect of a session. Implemented by the protocol frontend
/// that owns the underlying transport; the core never blocks on it (SPEC_FULL.md §4.E Close).
pub trait Disconnector: Send + Sync {
	fn disconnect(&self, reason: &str);
}

/// Closes the virtual filesystem bound to a session. Implemented by the out-of-scope VFS
/// backend; a session with no filesystem bound (e.g. not yet authenticated) has none.
pub trait FilesystemCloser: Send + Sync {
	fn close_fs(&self);
}

/// Forces a single transfer to stop. Implemented by the protocol frontend driving that
/// transfer. `signal_close` is best-effort: if the transfer already ended this is a no-op
/// on the frontend's side, matching SPEC_FULL.md §7's "SignalTransferClose is best-effort".
pub trait TransferCloseSignal: Send + Sync {
	fn signal_close(&self, err: SupervisorError);
}

/// A single in-flight transfer (SPEC_FULL.md §3 Transfer descriptor).
pub struct Transfer {
	id: i64,
	kind: TransferType,
	start_time_ms: i64,
	virtual_path: String,
	has_size_limit: bool,
	size: AtomicI64,
	uploaded_bytes: AtomicU64,
	downloaded_bytes: AtomicU64,
	close_signal: Option<Arc<dyn TransferCloseSignal>>,
}

impl fmt::Debug for Transfer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Transfer")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("start_time_ms", &self.start_time_ms)
			.field("virtual_path", &self.virtual_path)
			.field("has_size_limit", &self.has_size_limit)
			.field("size", &self.size)
			.field("uploaded_bytes", &self.uploaded_bytes)
			.field("downloaded_bytes", &self.downloaded_bytes)
			.field("close_signal", &self.close_signal.as_ref().map(|_| "<TransferCloseSignal>"))
			.finish()
	}
}

impl Transfer {
	#[must_use]
	pub fn new(id: i64, kind: TransferType, virtual_path: impl Into<String>, has_size_limit: bool, close_signal: Option<Arc<dyn TransferCloseSignal>>) -> Self {
		Self {
			id,
			kind,
			start_time_ms: now_millis(),
			virtual_path: virtual_path.into(),
			has_size_limit,
			size: AtomicI64::new(0),
			uploaded_bytes: AtomicU64::new(0),
			downloaded_bytes: AtomicU64::new(0),
			close_signal,
		}
	}

	#[must_use]
	pub const fn id(&self) -> i64 {
		self.id
	}

	#[must_use]
	pub const fn kind(&self) -> TransferType {
		self.kind
	}

	#[must_use]
	pub const fn has_size_limit(&self) -> bool {
		self.has_size_limit
	}

	#[must_use]
	pub fn virtual_path(&self) -> &str {
		&self.virtual_path
	}

	#[must_use]
	pub fn size(&self) -> i64 {
		self.size.load(Ordering::Relaxed)
	}

	#[must_use]
	pub fn uploaded_bytes(&self) -> u64 {
		self.uploaded_bytes.load(Ordering::Relaxed)
	}

	#[must_use]
	pub fn downloaded_bytes(&self) -> u64 {
		self.downloaded_bytes.load(Ordering::Relaxed)
	}

	/// Used by F's quota sweep to snapshot current transfer sizes (SPEC_FULL.md §4.F).
	pub fn update_current_sizes(&self, uploaded: u64, downloaded: u64) {
		self.uploaded_bytes.store(uploaded, Ordering::Relaxed);
		self.downloaded_bytes.store(downloaded, Ordering::Relaxed);
		self.size.store(uploaded.max(downloaded) as i64, Ordering::Relaxed);
	}

	/// Best-effort: a vanished close signal (frontend already tore the transfer down) is a
	/// silent no-op, matching §7's propagation policy for `SignalTransferClose`.
	pub fn signal_close(&self, err: SupervisorError) {
		if let Some(signal) = &self.close_signal {
			signal.signal_close(err);
		}
	}

	#[must_use]
	pub fn to_status(&self) -> TransferStatus {
		TransferStatus::new(self.kind, self.start_time_ms, self.size(), self.virtual_path.clone())
	}
}

/// A logical, post-accept client connection (SPEC_FULL.md §3 Session).
///
/// Modeled as a capability contract (a plain method set) rather than an inheritance
/// hierarchy, per SPEC_FULL.md §9's design note: every protocol's session is the same
/// concrete type carrying a `Protocol` tag, not a subclass.
pub struct Session {
	id: String,
	username: String,
	role: String,
	protocol: Protocol,
	client_version: Option<String>,
	local_address: String,
	remote_address: String,
	connection_time_ms: i64,
	last_activity_ms: AtomicI64,
	command: Mutex<Option<String>>,
	max_sessions: usize,
	transfers: Mutex<Vec<Transfer>>,
	disconnector: Option<Arc<dyn Disconnector>>,
	fs_closer: Option<Arc<dyn FilesystemCloser>>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("username", &self.username)
			.field("role", &self.role)
			.field("protocol", &self.protocol)
			.field("client_version", &self.client_version)
			.field("local_address", &self.local_address)
			.field("remote_address", &self.remote_address)
			.field("connection_time_ms", &self.connection_time_ms)
			.field("last_activity_ms", &self.last_activity_ms)
			.field("command", &self.command)
			.field("max_sessions", &self.max_sessions)
			.field("transfers", &self.transfers)
			.field("disconnector", &self.disconnector.as_ref().map(|_| "<Disconnector>"))
			.field("fs_closer", &self.fs_closer.as_ref().map(|_| "<FilesystemCloser>"))
			.finish()
	}
}

impl Session {
	#[must_use]
	pub fn builder(protocol: Protocol, remote_address: impl Into<String>) -> SessionBuilder {
		SessionBuilder::new(protocol, remote_address)
	}

	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	#[must_use]
	pub fn username(&self) -> &str {
		&self.username
	}

	#[must_use]
	pub fn role(&self) -> &str {
		&self.role
	}

	#[must_use]
	pub const fn max_sessions(&self) -> usize {
		self.max_sessions
	}

	#[must_use]
	pub fn local_address(&self) -> &str {
		&self.local_address
	}

	#[must_use]
	pub fn remote_address(&self) -> &str {
		&self.remote_address
	}

	#[must_use]
	pub fn remote_ip(&self) -> &str {
		self.remote_address.rsplit_once(':').map_or(self.remote_address.as_str(), |(ip, _)| ip)
	}

	#[must_use]
	pub fn client_version(&self) -> Option<&str> {
		self.client_version.as_deref()
	}

	#[must_use]
	pub const fn protocol(&self) -> Protocol {
		self.protocol
	}

	#[must_use]
	pub const fn connection_time(&self) -> i64 {
		self.connection_time_ms
	}

	#[must_use]
	pub fn last_activity(&self) -> i64 {
		self.last_activity_ms.load(Ordering::Relaxed)
	}

	pub fn record_activity(&self) {
		self.last_activity_ms.store(now_millis(), Ordering::Relaxed);
	}

	#[must_use]
	pub fn idle_for_ms(&self) -> i64 {
		(now_millis() - self.last_activity()).max(0)
	}

	#[must_use]
	pub fn command(&self) -> Option<String> {
		self.command.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
	}

	pub fn set_command(&self, command: Option<String>) {
		*self.command.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = command;
	}

	/// `true` for an FTP session that has not authenticated yet — the only session shape
	/// that gets the shorter idle-login timeout (§4.G) and the "no auth tried" audit event
	/// on removal (§4.E).
	#[must_use]
	pub fn is_unauthenticated_ftp(&self) -> bool {
		self.protocol == Protocol::Ftp && self.username.is_empty()
	}

	pub fn add_transfer(&self, transfer: Transfer) {
		self.transfers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(transfer);
	}

	pub fn remove_transfer(&self, transfer_id: i64) -> Option<Transfer> {
		let mut transfers = self.transfers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		let pos = transfers.iter().position(|t| t.id() == transfer_id)?;
		Some(transfers.swap_remove(pos))
	}

	#[must_use]
	pub fn has_transfers(&self) -> bool {
		!self.transfers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_empty()
	}

	pub fn with_transfers<R>(&self, f: impl FnOnce(&[Transfer]) -> R) -> R {
		f(&self.transfers.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
	}

	/// Best-effort: a transfer that already ended is a silent no-op (§7).
	pub fn signal_transfer_close(&self, transfer_id: i64, err: SupervisorError) {
		let transfers = self.transfers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		if let Some(transfer) = transfers.iter().find(|t| t.id() == transfer_id) {
			transfer.signal_close(err);
		}
	}

	/// Schedules a non-blocking disconnect; returns immediately regardless of whether a
	/// disconnector is bound (§4.E Close).
	pub fn disconnect(&self, reason: &str) {
		if let Some(d) = &self.disconnector {
			d.disconnect(reason);
		}
	}

	pub fn close_fs(&self) {
		if let Some(c) = &self.fs_closer {
			c.close_fs();
		}
	}

	#[must_use]
	pub fn to_status(&self) -> ConnectionStatus {
		let active_transfers = self.with_transfers(|transfers| if transfers.is_empty() { None } else { Some(transfers.iter().map(Transfer::to_status).collect()) });
		ConnectionStatus {
			username: self.username.clone(),
			connection_id: self.id.clone(),
			client_version: self.client_version.clone(),
			remote_address: self.remote_address.clone(),
			connection_time: self.connection_time_ms,
			last_activity: self.last_activity(),
			protocol: self.protocol,
			active_transfers,
			command: self.command(),
			node: None,
		}
	}
}

pub struct SessionBuilder {
	id: Option<String>,
	username: String,
	role: String,
	protocol: Protocol,
	client_version: Option<String>,
	local_address: String,
	remote_address: String,
	max_sessions: usize,
	disconnector: Option<Arc<dyn Disconnector>>,
	fs_closer: Option<Arc<dyn FilesystemCloser>>,
}

impl SessionBuilder {
	fn new(protocol: Protocol, remote_address: impl Into<String>) -> Self {
		Self {
			id: None,
			username: String::new(),
			role: String::new(),
			protocol,
			client_version: None,
			local_address: String::new(),
			remote_address: remote_address.into(),
			max_sessions: 0,
			disconnector: None,
			fs_closer: None,
		}
	}

	#[must_use]
	pub fn id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	#[must_use]
	pub fn username(mut self, username: impl Into<String>) -> Self {
		self.username = username.into();
		self
	}

	#[must_use]
	pub fn role(mut self, role: impl Into<String>) -> Self {
		self.role = role.into();
		self
	}

	#[must_use]
	pub fn client_version(mut self, v: impl Into<String>) -> Self {
		self.client_version = Some(v.into());
		self
	}

	#[must_use]
	pub fn local_address(mut self, a: impl Into<String>) -> Self {
		self.local_address = a.into();
		self
	}

	#[must_use]
	pub const fn max_sessions(mut self, n: usize) -> Self {
		self.max_sessions = n;
		self
	}

	#[must_use]
	pub fn disconnector(mut self, d: Arc<dyn Disconnector>) -> Self {
		self.disconnector = Some(d);
		self
	}

	#[must_use]
	pub fn fs_closer(mut self, c: Arc<dyn FilesystemCloser>) -> Self {
		self.fs_closer = Some(c);
		self
	}

	#[must_use]
	pub fn build(self) -> Session {
		let now = now_millis();
		Session {
			id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
			username: self.username,
			role: self.role,
			protocol: self.protocol,
			client_version: self.client_version,
			local_address: self.local_address,
			remote_address: self.remote_address,
			connection_time_ms: now,
			last_activity_ms: AtomicI64::new(now),
			command: Mutex::new(None),
			max_sessions: self.max_sessions,
			transfers: Mutex::new(Vec::new()),
			disconnector: self.disconnector,
			fs_closer: self.fs_closer,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unauthenticated_ftp_session_is_detected() {
		let s = Session::builder(Protocol::Ftp, "1.2.3.4:21").build();
		assert!(s.is_unauthenticated_ftp());
		let authed = Session::builder(Protocol::Ftp, "1.2.3.4:21").username("bob").build();
		assert!(!authed.is_unauthenticated_ftp());
	}

	#[test]
	fn remote_ip_strips_port() {
		let s = Session::builder(Protocol::Sftp, "10.0.0.5:2222").build();
		assert_eq!(s.remote_ip(), "10.0.0.5");
	}

	#[test]
	fn transfer_close_is_noop_without_signal() {
		let t = Transfer::new(1, TransferType::Upload, "/a", true, None);
		t.signal_close(SupervisorError::TransferAborted);
	}

	#[test]
	fn add_and_remove_transfer_round_trips() {
		let s = Session::builder(Protocol::Sftp, "1.1.1.1:22").build();
		s.add_transfer(Transfer::new(7, TransferType::Upload, "/x", true, None));
		assert!(s.has_transfers());
		let removed = s.remove_transfer(7);
		assert!(removed.is_some());
		assert!(!s.has_transfers());
	}

	#[test]
	fn status_omits_active_transfers_when_empty() {
		let s = Session::builder(Protocol::Sftp, "1.1.1.1:22").username("alice").build();
		let status = s.to_status();
		assert!(status.active_transfers.is_none());
	}
}
