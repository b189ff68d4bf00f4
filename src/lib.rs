//! toolgate - Policy-gated tool invocation
//!
//! Mediates every call from orchestration logic to a concrete capability
//! (search, summarization, templating, file storage, third-party plugins).
//!
//! # Architecture
//!
//! - Permission registry: checklist defaults plus project allow/deny lists
//! - Resilience executor: retry, timeout and per-key circuit breakers
//! - Safety checks: budget/privacy preflight and payload scrubbing
//! - Plugin sandbox: untrusted plugins run in a resource-limited child process
//! - Orchestrator: resolves, gates and executes calls; runs operations
//!
//! Every decision and call is recorded as an event on a run in the
//! file-backed run ledger.
//!
//! # Modules
//!
//! - `adapters`: The tool contract and the plugin tool
//! - `core`: Gating, resilience, safety, ledger and orchestration
//! - `domain`: Data structures (Run, Event, ToolDecision, PluginManifest)
//! - `sandbox`: Plugin host, runner, limits and store
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ask whether a tool may run
//! toolgate check web-search
//!
//! # Run a sandboxed plugin
//! toolgate plugin enable wordcount
//! toolgate plugin run wordcount --params '{"text": "a b c"}'
//!
//! # Inspect the ledger
//! toolgate runs
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use adapters::{Tool, ToolContext, ToolResult};
pub use config::Config;
pub use core::{Orchestrator, OrchestratorError, PermissionRegistry, ResilienceExecutor, RunLedger};
pub use domain::{Event, EventType, Run, RunStatus, ToolDecision};
pub use sandbox::{PluginError, PluginHost, PluginStore};
