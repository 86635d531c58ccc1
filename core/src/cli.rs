use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CONFIG_PATH_ENV};
use crate::driver::MemoryRegistry;
use crate::executor::Planner;
use crate::interpreter::{
    interpolate_string, json_to_val_map, tokenize, Evaluator, ExpressionError, VariableContext,
};
use crate::types::ActionDefinition;

#[derive(Parser)]
#[command(name = "pagescript")]
#[command(about = "pagescript - evaluate conditions and plan declarative browser actions", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate a condition expression and print the value as JSON
    Eval {
        /// Expression source, e.g. "params.count > 2 && !env.CI"
        expr: String,

        /// Params scope (JSON object)
        #[arg(long)]
        params: Option<String>,

        /// Env scope (JSON object)
        #[arg(long)]
        env: Option<String>,

        /// Steps scope (JSON object)
        #[arg(long)]
        steps: Option<String>,
    },

    /// Print the token stream of an expression
    Tokens {
        expr: String,
    },

    /// Substitute ${scope.path} references in a string
    Interpolate {
        text: String,

        /// Params scope (JSON object)
        #[arg(long)]
        params: Option<String>,

        /// Env scope (JSON object)
        #[arg(long)]
        env: Option<String>,
    },

    /// Dry-run an action from a JSON or YAML definition file
    Plan {
        /// File holding one action definition or a list of them
        file: PathBuf,

        /// Action to plan (full name); defaults to the first definition
        #[arg(short = 'a', long = "action")]
        action: Option<String>,

        /// Action params (JSON object)
        #[arg(long)]
        params: Option<String>,

        /// Env scope (JSON object)
        #[arg(long)]
        env: Option<String>,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    if let Some(config_path) = &cli.config {
        std::env::set_var(CONFIG_PATH_ENV, config_path);
    }

    // Fail on a bad config before printing anything
    let config = Config::load()?;
    init_tracing(&config.logging.level);

    match cli.command {
        Commands::Eval {
            expr,
            params,
            env,
            steps,
        } => {
            let vars = variables(params.as_deref(), env.as_deref(), steps.as_deref())?;
            let evaluator = Evaluator::new(config.limits.max_expression_depth);
            let value = evaluator.evaluate_str(&expr, &vars).map_err(diagnostic)?;
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
        }

        Commands::Tokens { expr } => {
            let tokens = tokenize(&expr).map_err(diagnostic)?;
            for token in tokens {
                println!(
                    "{:>4}  {:<12} {}",
                    token.position,
                    token.kind.to_string(),
                    token.value
                );
            }
        }

        Commands::Interpolate { text, params, env } => {
            let vars = variables(params.as_deref(), env.as_deref(), None)?;
            let rendered = interpolate_string(&text, &vars).map_err(diagnostic)?;
            println!("{}", rendered);
        }

        Commands::Plan {
            file,
            action,
            params,
            env,
        } => {
            let definitions = load_definitions(&file)?;
            let target = select_action(&definitions, action.as_deref())?.clone();

            let mut registry = MemoryRegistry::new();
            for definition in definitions {
                registry.register(definition);
            }
            tracing::debug!(actions = registry.len(), file = %file.display(), "loaded definitions");

            let params = JsonValue::Object(json_object("--params", params.as_deref())?);
            let env = JsonValue::Object(json_object("--env", env.as_deref())?);
            let planner = Planner::new(Arc::new(registry), config.limits.clone());
            let plan = planner.plan(&target, params, env)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}

/* ===================== Helpers ===================== */

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed by an embedding host
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Expression errors print with a caret under the offending position
fn diagnostic(err: ExpressionError) -> anyhow::Error {
    anyhow::anyhow!(err.render())
}

fn json_object(flag: &str, text: Option<&str>) -> Result<Map<String, JsonValue>> {
    let Some(text) = text else {
        return Ok(Map::new());
    };
    match serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", flag))? {
        JsonValue::Object(map) => Ok(map),
        other => anyhow::bail!(
            "{} must be a JSON object, got {}",
            flag,
            crate::types::json_type_name(&other)
        ),
    }
}

fn variables(
    params: Option<&str>,
    env: Option<&str>,
    steps: Option<&str>,
) -> Result<VariableContext> {
    Ok(VariableContext {
        params: json_to_val_map(&json_object("--params", params)?),
        env: json_to_val_map(&json_object("--env", env)?),
        steps: json_to_val_map(&json_object("--steps", steps)?),
        ..VariableContext::default()
    })
}

/// Read action definitions from a `.json`, `.yaml` or `.yml` file
pub fn load_definitions(path: &Path) -> Result<Vec<ActionDefinition>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let value: JsonValue = if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("invalid YAML in {}", path.display()))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))?
    };

    let definitions = match value {
        JsonValue::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ActionDefinition>, _>>(),
        single => serde_json::from_value(single).map(|d| vec![d]),
    }
    .with_context(|| format!("invalid action definition in {}", path.display()))?;

    if definitions.is_empty() {
        anyhow::bail!("no action definitions in {}", path.display());
    }
    Ok(definitions)
}

fn select_action<'a>(
    definitions: &'a [ActionDefinition],
    name: Option<&str>,
) -> Result<&'a ActionDefinition> {
    match name {
        None => definitions
            .first()
            .context("no action definitions loaded"),
        Some(name) => definitions
            .iter()
            .find(|d| d.full_name() == name || d.name == name)
            .with_context(|| format!("action '{}' not found", name)),
    }
}
