//! Switchboard - Routing Table Operator CLI
//!
//! Offline tooling for the task router: check a routing table against an
//! endpoint catalogue, dry-run a resolution under a given context, and
//! summarize exported routing history.
//!
//! # Usage
//!
//! ```bash
//! # Validate configuration (non-zero exit when invalid)
//! switchboard validate --endpoints endpoints.toml --table routing.json
//!
//! # Which chain would a dialogue task get while offline?
//! switchboard resolve --endpoints endpoints.toml --table routing.json \
//!     --task dialogue --context '{"network_type": "none"}'
//!
//! # Aggregate an exported history
//! switchboard stats --history history.json --window 200
//!
//! # Effective settings and where they came from
//! switchboard defaults
//! ```
//!
//! Paths not given on the command line come from the settings file
//! (`~/.config/switchboard/switchboard.toml`) or `SWITCHBOARD_*` variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use switchboard_core::config::{self, RouterSettings, SettingsOverrides};
use switchboard_core::routing::history::RoutingHistory;
use switchboard_core::routing::resolver::Resolver;
use switchboard_core::routing::stats::RoutingStats;
use switchboard_core::{EndpointRegistry, RoutingContext, RoutingDecision, RoutingTable, TaskRequest, TaskType};

/// Switchboard - operator tooling for the task router
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file path
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// Data file arguments shared by several subcommands
#[derive(clap::Args, Debug)]
struct FileArgs {
    /// Endpoint catalogue (JSON or TOML)
    #[arg(short = 'e', long, value_name = "FILE")]
    endpoints: Option<PathBuf>,

    /// Routing table (JSON or TOML)
    #[arg(short = 't', long, value_name = "FILE")]
    table: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the endpoint catalogue and routing table
    Validate {
        #[command(flatten)]
        files: FileArgs,
    },

    /// Dry-run the resolver and print the decision as JSON
    Resolve {
        #[command(flatten)]
        files: FileArgs,

        /// Task type (dialogue, simplification, intent_classification, ...)
        #[arg(long)]
        task: TaskType,

        /// Device and session conditions as inline JSON or a path to a JSON
        /// file; prompt length, endpoint status, latency and the task cost
        /// estimate are always taken from the request and catalogue
        #[arg(long, value_name = "JSON|FILE")]
        context: Option<String>,

        /// Prompt text used for length and cost conditions
        #[arg(long, default_value = "")]
        prompt: String,

        /// Drop chain entries below the task's minimum tier
        #[arg(long)]
        enforce_tier: bool,
    },

    /// Print aggregate statistics of an exported history file
    Stats {
        /// History exported as a JSON array
        #[arg(long, value_name = "FILE")]
        history: PathBuf,

        /// Records used for latency and failure rates
        #[arg(short = 'w', long, default_value_t = 100)]
        window: usize,
    },

    /// Print the effective settings and their source
    Defaults,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("switchboard={level},switchboard_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(config_path: Option<PathBuf>, files: Option<&FileArgs>) -> Result<RouterSettings> {
    let path = config_path.or_else(config::default_config_path);
    let mut settings = config::load_settings_from_path(path).context("Failed to load settings")?;

    if let Some(files) = files {
        let mut overrides = SettingsOverrides::new();
        if let Some(ref endpoints) = files.endpoints {
            overrides = overrides.with_endpoints(endpoints.clone());
        }
        if let Some(ref table) = files.table {
            overrides = overrides.with_routing_table(table.clone());
        }
        overrides.apply(&mut settings);
    }

    settings.validate()?;
    Ok(settings)
}

fn load_configuration(settings: &RouterSettings) -> Result<(EndpointRegistry, RoutingTable)> {
    let endpoints_path = settings
        .endpoints_path
        .as_deref()
        .context("No endpoint catalogue given (--endpoints or SWITCHBOARD_ENDPOINTS)")?;
    let table_path = settings
        .routing_table_path
        .as_deref()
        .context("No routing table given (--table or SWITCHBOARD_ROUTING_TABLE)")?;

    let registry = config::load_registry(endpoints_path)
        .with_context(|| format!("Failed to load endpoints from {}", endpoints_path.display()))?;
    let table = config::load_routing_table(table_path)
        .with_context(|| format!("Failed to load routing table from {}", table_path.display()))?;

    table.validate(&registry)?;
    Ok((registry, table))
}

fn parse_context(raw: &str) -> Result<RoutingContext> {
    let json = if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        std::fs::read_to_string(Path::new(raw)).with_context(|| format!("Failed to read context file {raw}"))?
    };
    serde_json::from_str(&json).context("Invalid routing context JSON")
}

/// Resolve `task` the way the running router would, without executing it
fn dry_run(
    settings: &RouterSettings,
    task: TaskType,
    context: Option<&str>,
    prompt: String,
    enforce_tier: bool,
) -> Result<RoutingDecision> {
    let (registry, table) = load_configuration(settings)?;

    let request = TaskRequest::new(task, prompt);
    let base = match context {
        Some(raw) => parse_context(raw)?,
        None => RoutingContext::default(),
    };
    let context = RoutingContext::capture(base, &request, &table, &registry);
    debug!(task_cost_estimate = ?context.task_cost_estimate, "Captured routing context");

    let resolver = Resolver::new().with_tier_compliance(enforce_tier || settings.enforce_tier_compliance);
    Ok(resolver.resolve(&request, &table, &registry, &context))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ResolveOutput<'a> {
    task_type: TaskType,
    decision: &'a RoutingDecision,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);
    debug!(?args, "Parsed arguments");

    match args.command {
        Command::Validate { files } => {
            let settings = load_settings(args.config, Some(&files))?;
            let (registry, table) = load_configuration(&settings)?;
            info!("Configuration valid");
            println!(
                "OK: {} endpoints, {} rules, fallback chain of {}",
                registry.len(),
                table.auto_routing_rules.len(),
                table.fallback_chain.len()
            );
        }

        Command::Resolve {
            files,
            task,
            context,
            prompt,
            enforce_tier,
        } => {
            let settings = load_settings(args.config, Some(&files))?;
            let decision = dry_run(&settings, task, context.as_deref(), prompt, enforce_tier)?;
            print_json(&ResolveOutput {
                task_type: task,
                decision: &decision,
            })?;
        }

        Command::Stats { history, window } => {
            let json = std::fs::read_to_string(&history)
                .with_context(|| format!("Failed to read history file {}", history.display()))?;
            let records = RoutingHistory::import_json(&json).context("Invalid history JSON")?;
            print_json(&RoutingStats::compute(&records, window))?;
        }

        Command::Defaults => {
            let settings = load_settings(args.config, None)?;
            info!(source = %settings.source(), "Effective settings");
            print_json(&settings)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "switchboard",
            "resolve",
            "--endpoints",
            "e.toml",
            "--table",
            "t.json",
            "--task",
            "intent_classification",
        ])
        .unwrap();
        let Command::Resolve { task, files, .. } = args.command else {
            panic!("expected resolve");
        };
        assert_eq!(task, TaskType::IntentClassification);
        assert_eq!(files.endpoints, Some(PathBuf::from("e.toml")));
    }

    #[test]
    fn test_unknown_task_rejected() {
        assert!(Args::try_parse_from(["switchboard", "resolve", "--task", "poetry"]).is_err());
    }

    #[test]
    fn test_inline_context() {
        let context = parse_context(r#"{"network_type": "none", "battery_level": 0.1}"#).unwrap();
        assert_eq!(context.battery_level, Some(0.1));
    }

    const ENDPOINTS: &str = r#"[
        {"id": "gpt-4o", "provider": "cloud_vendor", "tier": "frontier", "status": "available",
         "cost": {"per_input_unit": 0.0000025, "per_output_unit": 0.00001},
         "connection": {"location": "remote_cloud", "api_key_env": "OPENAI_API_KEY"}},
        {"id": "on-device-1b", "provider": "on_device", "tier": "tiny", "status": "available",
         "connection": {"location": "on_device", "model_path": "/m.gguf"}}
    ]"#;

    const COST_GUARD_TABLE: &str = r#"{
        "default_routes": {"dialogue": ["gpt-4o"]},
        "auto_routing_rules": [{
            "id": "cost-guard",
            "name": "CostGuard",
            "priority": 100,
            "conditions": [{"kind": "task_cost_estimate", "op": "gt", "value": 0.0}],
            "target_endpoint": "on-device-1b",
            "apply_to_task_types": ["dialogue"]
        }],
        "fallback_chain": ["gpt-4o"]
    }"#;

    fn settings_for(dir: &Path, table: &str) -> RouterSettings {
        let endpoints = dir.join("endpoints.json");
        let routing = dir.join("routing.json");
        std::fs::write(&endpoints, ENDPOINTS).unwrap();
        std::fs::write(&routing, table).unwrap();
        RouterSettings {
            endpoints_path: Some(endpoints),
            routing_table_path: Some(routing),
            ..RouterSettings::default()
        }
    }

    #[test]
    fn test_dry_run_sees_task_cost_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path(), COST_GUARD_TABLE);

        let decision = dry_run(&settings, TaskType::Dialogue, None, "how far is the moon".into(), false).unwrap();
        assert_eq!(decision.chain, vec!["on-device-1b".to_string(), "gpt-4o".to_string()]);
        assert_eq!(decision.reason.to_string(), "auto_rule(CostGuard)");
    }

    #[test]
    fn test_dry_run_keeps_device_conditions() {
        let dir = tempfile::tempdir().unwrap();
        let table = r#"{
            "default_routes": {"dialogue": ["gpt-4o"]},
            "auto_routing_rules": [{
                "id": "offline", "name": "Offline", "priority": 200,
                "conditions": [{"kind": "network_type", "types": {"one_of": ["none"]}}],
                "target_endpoint": "on-device-1b"
            }],
            "fallback_chain": ["gpt-4o"]
        }"#;
        let settings = settings_for(dir.path(), table);

        let online = dry_run(&settings, TaskType::Dialogue, None, "hi".into(), false).unwrap();
        assert_eq!(online.reason.to_string(), "default_route");

        let offline = dry_run(
            &settings,
            TaskType::Dialogue,
            Some(r#"{"network_type": "none"}"#),
            "hi".into(),
            false,
        )
        .unwrap();
        assert_eq!(offline.chain, vec!["on-device-1b".to_string(), "gpt-4o".to_string()]);
        assert_eq!(offline.reason.to_string(), "auto_rule(Offline)");
    }

    #[test]
    fn test_context_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");
        std::fs::write(&path, r#"{"thermal_state": "serious"}"#).unwrap();
        assert!(parse_context(path.to_str().unwrap()).is_ok());
    }
}
