//! Hook Runner (H): process-invocation and HTTP-GET hook execution plus the active-hook
//! counter the Shutdown Coordinator (I) drains against.
pub mod config;
pub mod post_disconnect;
pub mod runner;

pub use config::HookTarget;
pub use post_disconnect::{ConfiguredPostDisconnectHook, NoopPostDisconnectHook, PostDisconnectHook};
pub use runner::{ActiveHookCounter, ActiveHookGuard, HookEnv, HookError, HookKind, HookRunner};
