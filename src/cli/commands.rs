//! CLI command definitions for hack-judge.
//!
//! - `evaluate`: run the agents over a file of submissions and print a ranked report
//! - `costs`: summarize recorded spend for a hackathon
//! - `check-rubric`: validate a rubric file

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::{AgentIdentity, AgentRunner};
use crate::context::LocalContextProvider;
use crate::llm::{CostTracker, LiteLlmClient, LlmProvider, RateTable};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{
    BatchOrchestrator, BatchReport, EvaluationConfig, Submission, SubmissionOrchestrator,
};
use crate::scoring::RubricWeights;
use crate::storage::{CostStore, CostSummary, Database, InMemoryCostStore};

/// Multi-agent hackathon submission judge.
#[derive(Parser)]
#[command(name = "hack-judge")]
#[command(about = "Evaluate hackathon submissions with independent AI scoring agents")]
#[command(version)]
#[command(
    long_about = "hack-judge runs bug hunting, performance, innovation and AI-detection agents over each submission, verifies their evidence against the repository, records model cost, and ranks the results.\n\nExample usage:\n  hack-judge evaluate --submissions submissions.yaml --rubric rubric.yaml --rates rates.yaml --output report.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate a batch of submissions.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Show recorded model spend for a hackathon.
    Costs(CostsArgs),

    /// Validate a rubric file.
    CheckRubric(CheckRubricArgs),
}

/// Arguments for `hack-judge evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Submissions file (YAML or JSON): a list of {id, repo_url, ci_ref?, submitted_at?}.
    #[arg(short, long)]
    pub submissions: PathBuf,

    /// Rubric YAML (defaults to equal weights).
    #[arg(short, long, env = "JUDGE_RUBRIC_PATH")]
    pub rubric: Option<PathBuf>,

    /// Rate table YAML with per-token prices.
    #[arg(long, env = "JUDGE_RATES_PATH")]
    pub rates: Option<PathBuf>,

    /// Default model for all agents.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Hackathon id used to scope cost records.
    #[arg(long)]
    pub hackathon: Option<String>,

    /// Directory that relative repository paths are resolved against.
    #[arg(long, default_value = ".")]
    pub repos_dir: PathBuf,

    /// Maximum submissions evaluated at once.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Per-submission timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Repair attempts after an invalid agent response.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY; otherwise LITELLM_API_BASE is used).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Write the JSON report to this file as well as stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write Prometheus metrics in text format to this file after the run.
    #[arg(long)]
    pub metrics_output: Option<PathBuf>,
}

/// Arguments for `hack-judge costs`.
#[derive(Parser, Debug)]
pub struct CostsArgs {
    /// Hackathon to summarize.
    #[arg(long)]
    pub hackathon: String,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Arguments for `hack-judge check-rubric`.
#[derive(Parser, Debug)]
pub struct CheckRubricArgs {
    /// Rubric YAML file.
    pub file: PathBuf,
}

/// JSON document printed by `evaluate`.
#[derive(Debug, Serialize)]
struct EvaluationOutput<'a> {
    hackathon_id: &'a str,
    report: &'a BatchReport,
    /// Spend recorded for the hackathon, when the store could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    costs: Option<CostSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubmissionsFile {
    List(Vec<Submission>),
    Wrapped { submissions: Vec<Submission> },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Evaluate(args) => run_evaluate_command(args).await,
        Commands::Costs(args) => run_costs_command(args).await,
        Commands::CheckRubric(args) => run_check_rubric_command(args),
    }
}

// ============================================================================
// evaluate
// ============================================================================

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    let config = apply_overrides(EvaluationConfig::from_env()?, &args);
    config.validate()?;

    let submissions = load_submissions(&args.submissions)?;
    if submissions.is_empty() {
        anyhow::bail!("No submissions found in {}", args.submissions.display());
    }
    info!(
        count = submissions.len(),
        hackathon = %config.hackathon_id,
        "Loaded submissions"
    );

    init_metrics().map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {}", e))?;

    let rubric = load_rubric(config.rubric_path.as_deref())?;
    let rates = match &config.rates_path {
        Some(path) => RateTable::load(path)
            .with_context(|| format!("Failed to load rate table {}", path.display()))?,
        None => {
            warn!("No rate table configured; every cost record will be reported as unpriced");
            RateTable::new()
        }
    };

    let store: Arc<dyn CostStore> = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.run_migrations().await?;
            info!("Recording costs in PostgreSQL");
            Arc::new(db)
        }
        None => {
            info!("DATABASE_URL not set; cost records are kept in memory for this run");
            Arc::new(InMemoryCostStore::new())
        }
    };

    let llm = build_llm_client(args.api_key.clone(), config.default_model.clone())?;
    let runner = Arc::new(AgentRunner::new(llm, config.runner_config()));
    let costs = Arc::new(
        CostTracker::new(config.hackathon_id.clone(), Arc::new(rates), store)
            .with_write_timeout(config.cost_write_timeout),
    );
    let context = Arc::new(LocalContextProvider::new(&args.repos_dir));
    let hackathon_id = config.hackathon_id.clone();

    let orchestrator = Arc::new(SubmissionOrchestrator::new(
        context,
        runner,
        costs,
        Arc::new(rubric),
        config,
    ));
    let report = BatchOrchestrator::new(Arc::clone(&orchestrator))
        .run(submissions)
        .await;

    let cost_summary = match orchestrator.cost_tracker().summary().await {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(error = %e, "Could not read cost summary");
            None
        }
    };

    let output = EvaluationOutput {
        hackathon_id: &hackathon_id,
        report: &report,
        costs: cost_summary,
    };
    let json_output = serde_json::to_string_pretty(&output)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;

    if let Some(path) = &args.output {
        fs::write(path, &json_output)
            .with_context(|| format!("Failed to write output file {}", path.display()))?;
        info!(path = %path.display(), "Report written to file");
    }

    if let Some(path) = &args.metrics_output {
        fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics file {}", path.display()))?;
    }

    println!("{}", json_output);
    Ok(())
}

/// Command-line flags take precedence over `JUDGE_*` variables.
fn apply_overrides(mut config: EvaluationConfig, args: &EvaluateArgs) -> EvaluationConfig {
    if let Some(model) = &args.model {
        config = config.with_default_model(model.clone());
    }
    if let Some(hackathon) = &args.hackathon {
        config = config.with_hackathon_id(hackathon.clone());
    }
    if let Some(max) = args.max_concurrent {
        config = config.with_max_concurrent_submissions(max);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_submission_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(path) = &args.rubric {
        config = config.with_rubric_path(path.clone());
    }
    if let Some(path) = &args.rates {
        config = config.with_rates_path(path.clone());
    }
    config
}

/// Load submissions from YAML, or JSON when the extension says so.
fn load_submissions(path: &Path) -> anyhow::Result<Vec<Submission>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read submissions file {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let file: SubmissionsFile = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid submissions JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid submissions YAML in {}", path.display()))?
    };

    Ok(match file {
        SubmissionsFile::List(submissions) => submissions,
        SubmissionsFile::Wrapped { submissions } => submissions,
    })
}

fn load_rubric(path: Option<&Path>) -> anyhow::Result<RubricWeights> {
    let rubric = match path {
        Some(path) => RubricWeights::load(path)
            .with_context(|| format!("Failed to load rubric {}", path.display()))?,
        None => RubricWeights::default(),
    };
    rubric.validate()?;
    Ok(rubric)
}

fn build_llm_client(
    api_key: Option<String>,
    model: String,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let resolved_api_key = api_key.filter(|key| !key.trim().is_empty());

    if let Some(key) = resolved_api_key {
        info!(model = %model, "Using OpenRouter with specified API key");
        Ok(Arc::new(LiteLlmClient::openrouter(key, model)?))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key or set OPENROUTER_API_KEY or LITELLM_API_BASE.",
                e
            )
        })?))
    }
}

// ============================================================================
// costs
// ============================================================================

async fn run_costs_command(args: CostsArgs) -> anyhow::Result<()> {
    let db = Database::connect(&args.database_url).await?;
    db.run_migrations().await?;
    let summary = db.aggregate(&args.hackathon).await?;

    info!(
        hackathon = %args.hackathon,
        records = summary.totals.records,
        cost_usd = %summary.totals.cost_usd,
        "Cost summary loaded"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// ============================================================================
// check-rubric
// ============================================================================

fn run_check_rubric_command(args: CheckRubricArgs) -> anyhow::Result<()> {
    let rubric = load_rubric(Some(&args.file))?;

    println!("Rubric {} is valid", args.file.display());
    println!("  missing agent policy: {:?}", rubric.missing_agent_policy);
    for identity in AgentIdentity::ALL {
        if let Some(agent) = rubric.agent(identity) {
            let categories = agent
                .categories
                .iter()
                .map(|(name, weight)| format!("{}={}", name, weight))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  {:<22} {:>6}  [{}]", identity.as_str(), agent.weight, categories);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_evaluate_command_with_options() {
        let cli = Cli::try_parse_from([
            "hack-judge",
            "eval",
            "--submissions",
            "subs.yaml",
            "--model",
            "openai/gpt-4o-mini",
            "--max-concurrent",
            "8",
            "--timeout-secs",
            "120",
            "--max-retries",
            "1",
            "-l",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Evaluate(args) => {
                assert_eq!(args.submissions, PathBuf::from("subs.yaml"));
                let config = apply_overrides(EvaluationConfig::default(), &args);
                assert_eq!(config.default_model, "openai/gpt-4o-mini");
                assert_eq!(config.max_concurrent_submissions, 8);
                assert_eq!(config.submission_timeout, Duration::from_secs(120));
                assert_eq!(config.max_retries, 1);
            }
            _ => panic!("Expected Evaluate command"),
        }
    }

    #[test]
    fn test_check_rubric_parses() {
        let cli = Cli::try_parse_from(["hack-judge", "check-rubric", "rubric.yaml"])
            .expect("should parse");
        match cli.command {
            Commands::CheckRubric(args) => assert_eq!(args.file, PathBuf::from("rubric.yaml")),
            _ => panic!("Expected CheckRubric command"),
        }
    }

    #[test]
    fn test_load_submissions_yaml_and_json() {
        let dir = tempfile::tempdir().expect("tempdir");

        let yaml_path = dir.path().join("subs.yaml");
        let mut yaml = fs::File::create(&yaml_path).expect("create");
        writeln!(
            yaml,
            "- id: team-1\n  repo_url: repos/team-1\n  submitted_at: 2026-03-01T09:00:00Z\n- id: team-2\n  repo_url: repos/team-2\n  ci_ref: ci.log"
        )
        .expect("write");
        let loaded = load_submissions(&yaml_path).expect("yaml loads");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].ci_ref.as_deref(), Some("ci.log"));

        let json_path = dir.path().join("subs.json");
        fs::write(
            &json_path,
            r#"{"submissions": [{"id": "team-3", "repo_url": "/srv/team-3"}]}"#,
        )
        .expect("write");
        let loaded = load_submissions(&json_path).expect("json loads");
        assert_eq!(loaded[0].id, "team-3");
    }

    #[test]
    fn test_load_rubric_rejects_bad_weights() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rubric.yaml");
        fs::write(
            &path,
            "agents:\n  bug_hunter:\n    weight: 90\n    categories: {security: 100}\n",
        )
        .expect("write");
        assert!(load_rubric(Some(&path)).is_err());
        assert!(load_rubric(None).is_ok());
    }
}
