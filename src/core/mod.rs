//! Core gating logic.
//!
//! This module contains:
//! - Checklist / Permissions: allow/deny decisions for tool calls
//! - Safety / Redact: budget and privacy preflight, payload scrubbing
//! - CircuitBreaker / Resilience: retry, timeout and circuit breaking
//! - Retry: operation-level retry policy
//! - Ledger: file-backed run and event storage
//! - Orchestrator: resolves, gates and executes tool calls

pub mod checklist;
pub mod circuit_breaker;
pub mod ledger;
pub mod orchestrator;
pub mod permissions;
pub mod redact;
pub mod resilience;
pub mod retry;
pub mod safety;

// Re-export commonly used types
pub use checklist::{slugify, ChecklistCache, ChecklistIndex, ChecklistItem};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerState, CircuitState};
pub use ledger::{hash_input, RunLedger};
pub use orchestrator::{
    ContentEngine, Operation, OperationOutcome, OperationScope, Orchestrator, OrchestratorError,
};
pub use permissions::{canonicalize, PermissionRegistry};
pub use redact::postflight_scrub;
pub use resilience::{ResilienceConfig, ResilienceError, ResilienceExecutor};
pub use retry::RetryPolicy;
pub use safety::{preflight, BudgetStatus, SafetyReport, SafetyViolation};
