//! Out-of-process plugin sandbox.
//!
//! - `host`: launches the runner and decodes its envelope
//! - `runner`: the runner's logic (limits, entry resolution, plugin spawn)
//! - `limits`: OS resource limits
//! - `store`: installed plugins and their enabled state

pub mod host;
pub mod limits;
pub mod runner;
pub mod store;

pub use host::{default_runner_path, PluginError, PluginHost, RUNNER_BIN};
pub use runner::{resolve_entry, ResolvedEntry, RunnerArgs};
pub use store::PluginStore;
