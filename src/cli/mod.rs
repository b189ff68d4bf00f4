//! Command-line interface for toolgate.
//!
//! Provides commands for checking permissions, running the safety preflight,
//! scrubbing payloads, managing and running sandboxed plugins, and inspecting
//! the run ledger.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapters::{PluginTool, ToolContext};
use crate::config::{Config, ENV_CHECKLIST, ENV_HOME, ENV_PROJECT, ENV_RUNNER};
use crate::core::{
    postflight_scrub, preflight, ChecklistCache, Orchestrator, PermissionRegistry, RunLedger,
};
use crate::domain::{InvocationMetadata, ProjectMetadata, RunStatus};

/// toolgate - Policy-gated tool invocation
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub paths: PathArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Location overrides, each also read from its `TOOLGATE_*` variable
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Home directory for runs and plugins
    #[arg(long, global = true, env = ENV_HOME)]
    pub home: Option<PathBuf>,

    /// Checklist file
    #[arg(long, global = true, env = ENV_CHECKLIST)]
    pub checklist: Option<PathBuf>,

    /// Project metadata file
    #[arg(long, global = true, env = ENV_PROJECT)]
    pub project: Option<PathBuf>,

    /// Plugin runner executable
    #[arg(long, global = true, env = ENV_RUNNER)]
    pub runner: Option<PathBuf>,
}

impl PathArgs {
    /// Value for one of the `TOOLGATE_*` keys understood by [`Config::load_with`]
    fn lookup(&self, key: &str) -> Option<String> {
        let path = match key {
            ENV_HOME => self.home.as_ref(),
            ENV_CHECKLIST => self.checklist.as_ref(),
            ENV_PROJECT => self.project.as_ref(),
            ENV_RUNNER => self.runner.as_ref(),
            _ => None,
        }?;
        Some(path.display().to_string())
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decide whether a tool may run and record the decision
    Check {
        /// Tool name (any spelling; it is canonicalized)
        tool: String,

        /// Checklist item to gate on instead of the tool's default
        #[arg(short, long)]
        item: Option<String>,

        /// Record on an existing run instead of a new one
        #[arg(long)]
        run: Option<String>,
    },

    /// Evaluate budget and privacy policy for a call
    Preflight {
        /// Tool name
        tool: String,

        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Print a scrubbed copy of a JSON payload
    Scrub {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List installed plugins
    Plugins,

    /// Manage or run a plugin
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show a run and its events
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum PluginCommands {
    /// Enable an installed plugin
    Enable { plugin_id: String },

    /// Disable an installed plugin
    Disable { plugin_id: String },

    /// Run an enabled plugin through the permission gate and sandbox
    Run {
        plugin_id: String,

        /// JSON parameters passed to the plugin
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Checklist item to gate on
        #[arg(short, long)]
        item: Option<String>,

        #[command(flatten)]
        metadata: MetadataArgs,
    },
}

/// Cost and privacy metadata flags
#[derive(clap::Args, Debug, Clone, Default)]
pub struct MetadataArgs {
    /// Estimated cost of the call in USD
    #[arg(long)]
    pub estimate: Option<f64>,

    /// Explicit projected total in USD
    #[arg(long)]
    pub total_after: Option<f64>,

    /// Soft limit override in USD
    #[arg(long)]
    pub soft_limit: Option<f64>,

    /// Hard limit override in USD
    #[arg(long)]
    pub hard_limit: Option<f64>,

    /// Sharing scope (local, project, team, public, ...)
    #[arg(long)]
    pub scope: Option<String>,

    /// Consent to sharing beyond the project
    #[arg(long)]
    pub consent: bool,
}

impl From<MetadataArgs> for InvocationMetadata {
    fn from(args: MetadataArgs) -> Self {
        Self {
            estimated_cost_usd: args.estimate,
            total_after_usd: args.total_after,
            soft_limit_usd: args.soft_limit,
            hard_limit_usd: args.hard_limit,
            sharing_scope: args.scope,
            consent: args.consent,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let config = Config::load_with(&cwd, |key| self.paths.lookup(key))?;

        match self.command {
            Commands::Check { tool, item, run } => {
                check_tool(&config, &tool, item.as_deref(), run.as_deref()).await
            }
            Commands::Preflight { tool, metadata } => run_preflight(&config, &tool, metadata),
            Commands::Scrub { input } => scrub(input),
            Commands::Plugins => list_plugins(&config),
            Commands::Plugin { command } => match command {
                PluginCommands::Enable { plugin_id } => set_plugin_enabled(&config, &plugin_id, true),
                PluginCommands::Disable { plugin_id } => {
                    set_plugin_enabled(&config, &plugin_id, false)
                }
                PluginCommands::Run {
                    plugin_id,
                    params,
                    item,
                    metadata,
                } => run_plugin(&config, &plugin_id, &params, item.as_deref(), metadata).await,
            },
            Commands::Runs { limit } => list_runs(&config, limit).await,
            Commands::Status { run_id } => show_status(&config, &run_id).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn registry(config: &Config, ledger: RunLedger) -> Result<PermissionRegistry> {
    PermissionRegistry::from_files(&ChecklistCache::new(), &config.checklist, &config.project, ledger)
}

fn parse_run_id(run_id: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id).with_context(|| format!("Invalid run ID: {}", run_id))
}

/// Check a tool's permission
async fn check_tool(config: &Config, tool: &str, item: Option<&str>, run: Option<&str>) -> Result<()> {
    let ledger = config.ledger();
    let registry = registry(config, ledger.clone())?;

    let run_id = match run {
        Some(run_id) => parse_run_id(run_id)?,
        None => {
            ledger
                .create_run("check", json!({"tool": tool, "checklist_item": item}))
                .await?
                .run_id
        }
    };

    let decision = registry
        .check_permission(tool, run_id, item, Some(&json!({"caller": "cli"})))
        .await?;

    if run.is_none() {
        ledger.set_status(run_id, RunStatus::Completed).await?;
    }

    println!("{}", serde_json::to_string_pretty(&decision)?);
    eprintln!("\n[Decision recorded on run {}]", run_id);

    if !decision.allowed {
        std::process::exit(1);
    }
    Ok(())
}

/// Run the safety preflight for a call
fn run_preflight(config: &Config, tool: &str, metadata: MetadataArgs) -> Result<()> {
    let project = ProjectMetadata::load(&config.project)?;
    let tool = crate::core::canonicalize(tool);

    match preflight(&tool, &project, &metadata.into()) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(violation) => {
            eprintln!("Blocked: {}", violation);
            std::process::exit(1);
        }
    }
}

/// Scrub a JSON payload from a file or stdin
fn scrub(input_file: Option<PathBuf>) -> Result<()> {
    let input = if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    let payload: Value = serde_json::from_str(&input).context("Input is not valid JSON")?;
    println!("{}", serde_json::to_string_pretty(&postflight_scrub(&payload))?);
    Ok(())
}

/// List installed plugins
fn list_plugins(config: &Config) -> Result<()> {
    let records = config.plugin_store().list()?;

    if records.is_empty() {
        println!("No plugins installed in {}", config.plugins_dir.display());
        return Ok(());
    }

    println!("{:<24} {:<10} {}", "PLUGIN", "ENABLED", "MANIFEST");
    println!("{}", "-".repeat(75));

    for record in records {
        println!(
            "{:<24} {:<10} {}",
            record.plugin_id,
            if record.enabled { "yes" } else { "no" },
            record.manifest_path.display()
        );
    }

    Ok(())
}

fn set_plugin_enabled(config: &Config, plugin_id: &str, enabled: bool) -> Result<()> {
    let record = config.plugin_store().set_enabled(plugin_id, enabled)?;
    println!(
        "Plugin '{}' {}",
        record.plugin_id,
        if record.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Run a plugin through the orchestrator
async fn run_plugin(
    config: &Config,
    plugin_id: &str,
    params: &str,
    item: Option<&str>,
    metadata: MetadataArgs,
) -> Result<()> {
    let store = config.plugin_store();
    let record = store.record(plugin_id)?;
    if !record.enabled {
        anyhow::bail!(
            "Plugin '{}' is disabled. Enable it with: toolgate plugin enable {}",
            plugin_id,
            plugin_id
        );
    }
    // Fail on a broken manifest before anything is recorded
    store.manifest(plugin_id)?;

    let params: Value = serde_json::from_str(params).context("--params is not valid JSON")?;

    let ledger = config.ledger();
    let mut orchestrator = Orchestrator::new(registry(config, ledger.clone())?, config.executor(), ledger.clone())
        .with_retry_policy(config.operations.retry.clone())
        .with_operation_concurrency(config.operations.concurrency);
    let tool = PluginTool::from_record(&record, config.plugin_host());
    let tool_name = crate::core::canonicalize(plugin_id);
    orchestrator.register(Arc::new(tool));

    let run = ledger
        .create_run("plugin", json!({"plugin_id": plugin_id, "params": params}))
        .await?;
    let ctx = ToolContext::new(run.run_id, tool_name.clone(), params).with_metadata(metadata.into());

    match orchestrator.invoke(&tool_name, ctx, item).await {
        Ok(result) => {
            ledger.set_status(run.run_id, RunStatus::Completed).await?;
            println!("{}", serde_json::to_string_pretty(&postflight_scrub(&result.output))?);
            eprintln!("\n[Run {} completed successfully]", run.run_id);
            Ok(())
        }
        Err(e) => {
            ledger.set_status(run.run_id, RunStatus::Failed).await?;
            eprintln!("\n[Run {} failed: {}]", run.run_id, e);
            std::process::exit(1);
        }
    }
}

/// List recent runs
async fn list_runs(config: &Config, limit: usize) -> Result<()> {
    let runs = config.ledger().list_runs().await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<16} {:<10} {:<7} {}", "RUN ID", "KIND", "STATUS", "EVENTS", "CREATED");
    println!("{}", "-".repeat(100));

    for run in runs.into_iter().take(limit) {
        let status = match run.status {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        println!(
            "{:<38} {:<16} {:<10} {:<7} {}",
            run.run_id,
            run.kind,
            status,
            run.events.len(),
            run.created_at.to_rfc3339()
        );
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(config: &Config, run_id: &str) -> Result<()> {
    let run_id = parse_run_id(run_id)?;
    let run = config.ledger().load(run_id).await?;

    println!("Run ID: {}", run.run_id);
    println!("Kind: {}", run.kind);
    println!("Status: {:?}", run.status);
    println!("Created: {}", run.created_at);
    println!("Updated: {}", run.updated_at);
    println!("\nEvents:");
    for event in &run.events {
        println!(
            "  #{:<3} {} {:<20} {}",
            event.id,
            event.timestamp.format("%H:%M:%S%.3f"),
            event.event_type,
            event.payload
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(config: &Config) -> Result<()> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    print!("{}", serde_yaml::to_string(config).context("Failed to render configuration")?);
    Ok(())
}
