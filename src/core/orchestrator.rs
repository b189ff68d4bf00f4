//! Tool gating and operation orchestration.
//!
//! The orchestrator is the only way callers reach a tool. It resolves the
//! handler, asks the permission registry, runs the safety preflight and then
//! executes the call through the resilience executor (in-process tools) or
//! directly (sandboxed tools, which carry their own isolation). Every step is
//! recorded on the caller's run.
//!
//! Higher-level operations delegate to a [`ContentEngine`] under a uniform
//! retry policy and are each recorded as their own run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Isolation, Tool, ToolContext, ToolResult};
use crate::domain::{EventType, InvocationMetadata, RunStatus, ToolDecision};
use crate::sandbox::PluginError;

use super::ledger::RunLedger;
use super::permissions::{canonicalize, PermissionRegistry};
use super::resilience::{ResilienceError, ResilienceExecutor};
use super::retry::{retry_with_policy, RetryPolicy};
use super::safety::{self, BudgetStatus, SafetyViolation};

/// Default number of operations allowed to run at once
pub const DEFAULT_OPERATION_CONCURRENCY: usize = 2;

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Tool '{}' not permitted ({}): {}", .0.tool, .0.source, .0.reason)]
    NotPermitted(ToolDecision),

    #[error(transparent)]
    Safety(#[from] SafetyViolation),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error("Tool '{tool}' failed: {source}")]
    ToolFailed {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Operation '{operation}' failed after {attempts} attempts: {source:#}")]
    OperationFailed {
        operation: Operation,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("No content engine configured")]
    NoContentEngine,

    #[error("Operation pool closed")]
    PoolClosed,

    #[error("Run ledger error: {0:#}")]
    Ledger(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Policy outcomes that retrying cannot change
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_)
                | Self::NotPermitted(_)
                | Self::Safety(_)
                | Self::Resilience(ResilienceError::CircuitOpen { .. })
        )
    }
}

/// Whether an operation error is worth another attempt
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        return !e.is_policy();
    }
    if err.downcast_ref::<SafetyViolation>().is_some() {
        return false;
    }
    !matches!(
        err.downcast_ref::<ResilienceError>(),
        Some(ResilienceError::CircuitOpen { .. })
    )
}

async fn acquire_slot(slots: &Semaphore) -> Result<SemaphorePermit<'_>, OrchestratorError> {
    slots.acquire().await.map_err(|_| OrchestratorError::PoolClosed)
}

/// Top-level operation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    BuildOutline,
    GenerateDraft,
    Rewrite,
    Critique,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildOutline => "build_outline",
            Self::GenerateDraft => "generate_draft",
            Self::Rewrite => "rewrite",
            Self::Critique => "critique",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub run_id: Uuid,
    pub operation: Operation,
    pub output: Value,
}

/// What an operation's engine can do while it runs: invoke gated tools on
/// the operation's run
pub struct OperationScope<'a> {
    orchestrator: &'a Orchestrator,
    run_id: Uuid,
    operation: Operation,
}

impl OperationScope<'_> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Invoke a tool on this operation's run
    pub async fn invoke(
        &self,
        name: &str,
        params: Value,
        metadata: InvocationMetadata,
    ) -> Result<ToolResult, OrchestratorError> {
        let ctx = ToolContext::new(self.run_id, name, params).with_metadata(metadata);
        self.orchestrator.invoke(name, ctx, None).await
    }

    /// Invoke a tool, gating it on a specific checklist item
    pub async fn invoke_for_item(
        &self,
        name: &str,
        checklist_item: &str,
        params: Value,
        metadata: InvocationMetadata,
    ) -> Result<ToolResult, OrchestratorError> {
        let ctx = ToolContext::new(self.run_id, name, params).with_metadata(metadata);
        self.orchestrator.invoke(name, ctx, Some(checklist_item)).await
    }
}

/// External content-generation logic driven by the orchestrator
#[async_trait]
pub trait ContentEngine: Send + Sync {
    async fn build_outline(&self, scope: &OperationScope<'_>, params: Value) -> Result<Value>;

    async fn generate_draft(&self, scope: &OperationScope<'_>, params: Value) -> Result<Value>;

    async fn rewrite(&self, scope: &OperationScope<'_>, params: Value) -> Result<Value>;

    async fn critique(&self, scope: &OperationScope<'_>, params: Value) -> Result<Value>;
}

/// Policy-gated tool orchestrator
pub struct Orchestrator {
    tools: HashMap<String, Arc<dyn Tool>>,
    registry: PermissionRegistry,
    executor: ResilienceExecutor,
    ledger: RunLedger,
    engine: Option<Arc<dyn ContentEngine>>,
    retry: RetryPolicy,
    operation_slots: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(registry: PermissionRegistry, executor: ResilienceExecutor, ledger: RunLedger) -> Self {
        Self {
            tools: HashMap::new(),
            registry,
            executor,
            ledger,
            engine: None,
            retry: RetryPolicy::default(),
            operation_slots: Arc::new(Semaphore::new(DEFAULT_OPERATION_CONCURRENCY)),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ContentEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound on concurrently running operations
    pub fn with_operation_concurrency(mut self, slots: usize) -> Self {
        self.operation_slots = Arc::new(Semaphore::new(slots.max(1)));
        self
    }

    /// Register a tool under its canonical name, replacing any previous handler
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = canonicalize(tool.name());
        debug!(tool = %name, isolation = ?tool.isolation(), "Registered tool");
        self.tools.insert(name, tool);
    }

    /// Registered tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registry(&self) -> &PermissionRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &ResilienceExecutor {
        &self.executor
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Resolve a tool name to an approved handler.
    ///
    /// Unregistered names fail with `UnknownTool` before any permission check;
    /// denials fail with `NotPermitted` after the decision is recorded.
    #[instrument(skip(self, metadata))]
    pub async fn resolve(
        &self,
        name: &str,
        run_id: Uuid,
        checklist_item: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<Arc<dyn Tool>, OrchestratorError> {
        let canonical = canonicalize(name);
        let Some(tool) = self.tools.get(&canonical) else {
            warn!(tool = %canonical, "No handler registered");
            return Err(OrchestratorError::UnknownTool(canonical));
        };

        let decision = self
            .registry
            .check_permission(name, run_id, checklist_item, metadata)
            .await?;

        if !decision.allowed {
            return Err(OrchestratorError::NotPermitted(decision));
        }

        Ok(tool.clone())
    }

    /// Resolve, preflight and execute one tool call
    #[instrument(skip(self, ctx), fields(run_id = %ctx.run_id))]
    pub async fn invoke(
        &self,
        name: &str,
        ctx: ToolContext,
        checklist_item: Option<&str>,
    ) -> Result<ToolResult, OrchestratorError> {
        let run_id = ctx.run_id;
        let metadata = serde_json::to_value(&ctx.metadata).unwrap_or(Value::Null);
        let tool = self.resolve(name, run_id, checklist_item, Some(&metadata)).await?;
        let canonical = canonicalize(name);

        let report = match safety::preflight(&canonical, self.registry.project(), &ctx.metadata) {
            Ok(report) => report,
            Err(violation) => {
                warn!(tool = %canonical, %violation, "Tool call blocked");
                self.ledger
                    .append_event(
                        run_id,
                        EventType::ToolBlocked,
                        json!({"tool": canonical, "violation": violation.to_string()}),
                    )
                    .await?;
                return Err(violation.into());
            }
        };

        match report.budget_status {
            BudgetStatus::SoftLimit => warn!(
                tool = %canonical,
                total_after_usd = ?report.total_after_usd,
                soft_limit_usd = report.soft_limit_usd,
                "Tool call exceeds soft budget limit"
            ),
            BudgetStatus::Unknown => debug!(tool = %canonical, "No cost estimate, budget not enforced"),
            BudgetStatus::Ok => {}
        }

        self.ledger
            .append_event(
                run_id,
                EventType::ToolInvoked,
                json!({"tool": canonical, "params": ctx.params, "safety": report}),
            )
            .await?;

        let mut ctx = ctx;
        ctx.tool = canonical.clone();

        let result = match tool.isolation() {
            Isolation::InProcess => {
                let handler = tool.clone();
                self.executor
                    .execute(&canonical, move || {
                        let handler = handler.clone();
                        let ctx = ctx.clone();
                        async move { handler.invoke(ctx).await }
                    })
                    .await
                    .map_err(OrchestratorError::from)
            }
            Isolation::Sandboxed => tool
                .invoke(ctx)
                .await
                .map_err(|source| OrchestratorError::ToolFailed {
                    tool: canonical.clone(),
                    source,
                }),
        };

        match &result {
            Ok(output) => {
                info!(tool = %canonical, "Tool completed");
                self.ledger
                    .append_event(
                        run_id,
                        EventType::ToolCompleted,
                        json!({
                            "tool": canonical,
                            "output": output.output,
                            "cost_usd": output.cost_usd,
                            "metadata": output.metadata,
                        }),
                    )
                    .await?;
            }
            Err(e) => {
                error!(tool = %canonical, error = %e, "Tool failed");
                self.ledger
                    .append_event(
                        run_id,
                        EventType::ToolFailed,
                        json!({
                            "tool": canonical,
                            "error": e.to_string(),
                            "details": failure_details(e),
                        }),
                    )
                    .await?;
            }
        }

        result
    }

    pub async fn build_outline(&self, params: Value) -> Result<OperationOutcome, OrchestratorError> {
        self.run_operation(Operation::BuildOutline, params).await
    }

    pub async fn generate_draft(&self, params: Value) -> Result<OperationOutcome, OrchestratorError> {
        self.run_operation(Operation::GenerateDraft, params).await
    }

    pub async fn rewrite(&self, params: Value) -> Result<OperationOutcome, OrchestratorError> {
        self.run_operation(Operation::Rewrite, params).await
    }

    pub async fn critique(&self, params: Value) -> Result<OperationOutcome, OrchestratorError> {
        self.run_operation(Operation::Critique, params).await
    }

    /// Build an outline and generate a draft concurrently
    pub async fn outline_and_draft(
        &self,
        outline_params: Value,
        draft_params: Value,
    ) -> (
        Result<OperationOutcome, OrchestratorError>,
        Result<OperationOutcome, OrchestratorError>,
    ) {
        tokio::join!(
            self.build_outline(outline_params),
            self.generate_draft(draft_params)
        )
    }

    /// Rewrite, then critique the rewritten text
    pub async fn rewrite_and_critique(
        &self,
        params: Value,
    ) -> Result<(OperationOutcome, OperationOutcome), OrchestratorError> {
        let rewritten = self.rewrite(params).await?;
        let critique_params = json!({
            "draft": rewritten.output,
            "rewrite_run_id": rewritten.run_id,
        });
        let critique = self.critique(critique_params).await?;
        Ok((rewritten, critique))
    }

    #[instrument(skip(self, params))]
    async fn run_operation(
        &self,
        operation: Operation,
        params: Value,
    ) -> Result<OperationOutcome, OrchestratorError> {
        let engine = self.engine.clone().ok_or(OrchestratorError::NoContentEngine)?;

        let _slot = acquire_slot(&self.operation_slots).await?;

        let run = self.ledger.create_run(operation.as_str(), params.clone()).await?;
        let run_id = run.run_id;
        info!(%run_id, "Operation started");
        self.ledger
            .append_event(
                run_id,
                EventType::OperationStarted,
                json!({"operation": operation, "params": params}),
            )
            .await?;

        let scope = OperationScope {
            orchestrator: self,
            run_id,
            operation,
        };
        let scope = &scope;
        let engine = &engine;

        let result = retry_with_policy(
            &self.retry,
            |_attempt| {
                let params = params.clone();
                async move { dispatch(engine.as_ref(), scope, params).await }
            },
            is_retryable,
            |attempt, err, delay| {
                let message = format!("{:#}", err);
                let ledger = self.ledger.clone();
                async move {
                    let payload = json!({
                        "operation": operation,
                        "attempt": attempt,
                        "error": message,
                        "delay_ms": delay.as_millis() as u64,
                    });
                    if let Err(e) = ledger
                        .append_event(run_id, EventType::OperationRetrying, payload)
                        .await
                    {
                        warn!(%run_id, error = %e, "Failed to record retry");
                    }
                }
            },
        )
        .await;

        match result {
            Ok(output) => {
                self.ledger
                    .append_event(
                        run_id,
                        EventType::OperationCompleted,
                        json!({"operation": operation, "output": output}),
                    )
                    .await?;
                self.ledger.set_status(run_id, RunStatus::Completed).await?;
                info!(%run_id, "Operation completed");

                Ok(OperationOutcome {
                    run_id,
                    operation,
                    output,
                })
            }
            Err(exhausted) => {
                let attempts = exhausted.attempts;
                let last_error = exhausted.last_error;
                error!(%run_id, attempts, error = %format!("{:#}", last_error), "Operation failed");

                self.ledger
                    .append_event(
                        run_id,
                        EventType::OperationFailed,
                        json!({
                            "operation": operation,
                            "attempts": attempts,
                            "error": format!("{:#}", last_error),
                        }),
                    )
                    .await?;
                self.ledger.set_status(run_id, RunStatus::Failed).await?;

                // Policy outcomes surface as themselves
                let source = match last_error.downcast::<OrchestratorError>() {
                    Ok(e) if e.is_policy() => return Err(e),
                    Ok(e) => anyhow::Error::new(e),
                    Err(other) => other,
                };

                Err(OrchestratorError::OperationFailed {
                    operation,
                    attempts,
                    source,
                })
            }
        }
    }
}

async fn dispatch(engine: &dyn ContentEngine, scope: &OperationScope<'_>, params: Value) -> Result<Value> {
    match scope.operation {
        Operation::BuildOutline => engine.build_outline(scope, params).await,
        Operation::GenerateDraft => engine.generate_draft(scope, params).await,
        Operation::Rewrite => engine.rewrite(scope, params).await,
        Operation::Critique => engine.critique(scope, params).await,
    }
}

/// Structured details for a failed call, when the failure carries any
fn failure_details(err: &OrchestratorError) -> Value {
    match err {
        OrchestratorError::ToolFailed { source, .. } => source
            .downcast_ref::<PluginError>()
            .map(|e| e.details.clone())
            .unwrap_or(Value::Null),
        OrchestratorError::Resilience(ResilienceError::Exhausted { source, .. }) => source
            .downcast_ref::<PluginError>()
            .map(|e| e.details.clone())
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}
