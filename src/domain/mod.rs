//! Domain types for toolgate.
//!
//! This module contains the core data structures:
//! - Events and Runs: the run ledger's persisted shape
//! - ToolDecision: permission outcomes
//! - Metadata: project and per-call policy inputs
//! - Plugin: manifests, records, limits and the runner envelope

pub mod decision;
pub mod events;
pub mod metadata;
pub mod plugin;
pub mod run;

// Re-export commonly used types
pub use decision::{DecisionSource, ToolDecision};
pub use events::{Event, EventType};
pub use metadata::{Budget, InvocationMetadata, ProjectMetadata, ToolLists, WILDCARD};
pub use plugin::{
    EntryPoint, Envelope, LimitOverrides, PluginManifest, PluginRecord, PluginState,
    ResourceLimits,
};
pub use run::{Run, RunStatus};
