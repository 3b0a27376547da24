//! Bridge between the host object model and the embedded runtime.
//!
//! The host side is a QuickJS context, the embedded side a Lua state. Host
//! objects reach Lua as facade userdata; Lua tables, functions, userdata
//! and threads reach the host as wrapper functions or transparent proxies.
//! Identity survives round trips through the identity cache, and errors
//! cross in both directions as first-class values.

pub mod cache;
mod capability;
pub mod config;
pub mod context;
mod convert;
pub mod error;
pub mod facade;
mod foreign;
pub mod guard;
pub mod handle;
pub mod iter;
mod library;
pub mod proxy;

pub use cache::{CacheStats, IdentityCache};
pub use config::{InteropConfig, RuntimeOptions};
pub use context::{Bridge, Session};
pub use error::BridgeError;
pub use facade::{Facade, FACADE_TYPE};
pub use guard::HookGuard;
pub use handle::ForeignHandle;
pub use iter::{ForeignIterator, IterationRecord};
pub use proxy::ProxyShape;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
