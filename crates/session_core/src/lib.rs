//! Session Registry (E), SSH-Channel Table (D), Idle Sweeper (G) and Scan Registries (K).
//!
//! The registry is a single `RwLock` over a slice, an id->index map, and a per-user count
//! map — not a lock-free concurrent map — so that the bijection and swap-with-last
//! invariants this workspace's sweep logic depends on hold under one lock instead of being
//! spread across a map's internal shard locks.

pub mod registry;
pub mod scan;
pub mod session;
pub mod ssh_channel;
pub mod sweeper;

pub use registry::{Auditor, MetricsSink, NoopAuditor, NoopMetricsSink, SessionRegistry, SessionStats, TracingAuditor, TracingMetricsSink};
pub use scan::{ScanRecord, ScanRegistries, ScanRegistry};
pub use session::{Disconnector, FilesystemCloser, Session, SessionBuilder, Transfer, TransferCloseSignal};
pub use ssh_channel::{SshChannel, SshChannelCloser, SshChannelTable};
pub use sweeper::{IdleSweepReport, IdleSweeper};
