//! CLI command definitions for kube-agent-bench.
//!
//! Three subcommands: `run` evaluates tasks against models, `analyze`
//! re-reads stored results and renders a report, `list` shows the tasks a
//! directory provides.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::report::{analyze, failed_results, load_results, print_summary, write_report, OutputFormat};
use crate::runner::{
    report_path, split_and_trim, ClusterPolicy, LlmConfig, RunConfig, Runner,
};
use crate::task::{filter_tasks, load_tasks, Difficulty, FilterOptions, Task};
use crate::utils::truncate_to;

/// Default task directory.
const DEFAULT_TASK_DIR: &str = "./tasks";

/// Default directory holding results.
const DEFAULT_RESULTS_DIR: &str = ".build";

/// Benchmark harness for AI agents operating Kubernetes clusters.
#[derive(Parser)]
#[command(name = "kube-agent-bench")]
#[command(about = "Evaluate AI agents on Kubernetes tasks")]
#[command(version)]
#[command(
    long_about = "kube-agent-bench runs AI agents against Kubernetes tasks, each in its own namespace, and reports how often they succeed.\n\nExample usage:\n  kube-agent-bench run --task-dir ./tasks --models openai:gpt-4o,ollama:qwen2.5 --parallelism 4"
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
    /// Run the benchmark.
    Run(Box<RunArgs>),

    /// Analyze stored results and render a report.
    Analyze(AnalyzeArgs),

    /// List available tasks.
    List(ListArgs),
}

/// Arguments for `kube-agent-bench run`.
///
/// Every flag is optional so that values from `--config` are only
/// overridden by flags that were actually given.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// YAML run configuration. Flags override values from the file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory containing task subdirectories.
    #[arg(short, long)]
    pub task_dir: Option<PathBuf>,

    /// Regex matched against task ids.
    #[arg(long)]
    pub task_pattern: Option<String>,

    /// Only run tasks of this difficulty (easy, medium, hard).
    #[arg(long)]
    pub difficulty: Option<Difficulty>,

    /// Comma-separated categories to include.
    #[arg(long)]
    pub categories: Option<String>,

    /// Comma-separated tags to include.
    #[arg(long)]
    pub tags: Option<String>,

    /// Comma-separated models as provider:model (e.g. openai:gpt-4o,ollama:qwen2.5).
    #[arg(short, long)]
    pub models: Option<String>,

    /// Provider for a single model given with --llm-model.
    #[arg(long, default_value = "openai")]
    pub llm_provider: String,

    /// Single model to evaluate.
    #[arg(long)]
    pub llm_model: Option<String>,

    /// OpenAI-compatible endpoint overriding the provider default.
    #[arg(long)]
    pub llm_endpoint: Option<String>,

    /// API key for the models (falls back to OPENAI_API_KEY).
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Let the built-in agent call kubectl and bash tools.
    #[arg(long)]
    pub enable_tool_use: bool,

    /// Approve every tool call without asking.
    #[arg(long)]
    pub auto_approve: bool,

    /// Number of evaluations running at once.
    #[arg(short, long)]
    pub parallelism: Option<usize>,

    /// Timeout for tasks that do not set their own (e.g. 10m).
    #[arg(long)]
    pub timeout: Option<String>,

    /// Extra attempts for evaluations ending in error or timeout.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Cluster backend: kind, vcluster or existing.
    #[arg(long)]
    pub cluster_provider: Option<String>,

    /// Kubeconfig of an existing cluster.
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Cluster name. Defaults to kube-bench-<run id>.
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Cluster creation policy: always, create_if_not or do_not_create.
    #[arg(long)]
    pub cluster_policy: Option<ClusterPolicy>,

    /// Host kubeconfig for vcluster.
    #[arg(long)]
    pub host_kubeconfig: Option<String>,

    /// Node image for kind clusters.
    #[arg(long)]
    pub kind_image: Option<String>,

    /// Directory for results and the report.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Report format: json, jsonl, yaml or markdown.
    #[arg(short = 'f', long)]
    pub output_format: Option<OutputFormat>,

    /// Save the agent trace next to each result.
    #[arg(long)]
    pub save_trace: bool,

    /// Save a human-readable log next to each result.
    #[arg(long)]
    pub save_log: bool,

    /// External agent binary. The built-in agent is used when unset.
    #[arg(long)]
    pub agent_bin: Option<PathBuf>,

    /// Comma-separated arguments passed to the agent binary before its own flags.
    #[arg(long)]
    pub agent_args: Option<String>,

    /// Pass --enable-tool-use-shim to the external agent.
    #[arg(long)]
    pub enable_tool_use_shim: bool,

    /// Maximum tool-calling rounds.
    #[arg(long)]
    pub agent_max_turns: Option<u32>,

    /// Maximum tokens per completion.
    #[arg(long)]
    pub agent_max_tokens: Option<u32>,

    /// System prompt replacing the built-in agent's default.
    #[arg(long)]
    pub agent_system_prompt: Option<String>,

    /// Suppress per-task progress lines.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for `kube-agent-bench analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Directory containing result files.
    #[arg(short, long, default_value = DEFAULT_RESULTS_DIR)]
    pub input_dir: PathBuf,

    /// Report format: json, jsonl, yaml or markdown.
    #[arg(short = 'f', long, default_value = "markdown")]
    pub output_format: OutputFormat,

    /// Report file. Printed to stdout when unset.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// List every evaluation that did not succeed.
    #[arg(long)]
    pub show_failures: bool,
}

/// Arguments for `kube-agent-bench list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Directory containing task subdirectories.
    #[arg(short, long, default_value = DEFAULT_TASK_DIR)]
    pub task_dir: PathBuf,

    /// Regex matched against task ids.
    #[arg(long)]
    pub task_pattern: Option<String>,

    /// Only list tasks of this difficulty.
    #[arg(long)]
    pub difficulty: Option<Difficulty>,

    /// Comma-separated categories to include.
    #[arg(long)]
    pub categories: Option<String>,

    /// Include disabled tasks.
    #[arg(long)]
    pub all: bool,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the command selected by `cli`.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_benchmark_command(*args).await,
        Commands::Analyze(args) => run_analyze_command(args),
        Commands::List(args) => run_list_command(args),
    }
}

async fn run_benchmark_command(args: RunArgs) -> anyhow::Result<()> {
    let config = build_run_config(args)?;
    let output_dir = config.output_dir.clone();
    let format = config.output_format;

    let runner = Runner::new(config)?;
    info!(run_id = %runner.run_id(), cluster = %runner.cluster_name(), "Starting benchmark run");

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let summary = runner.run().await?;
    let results = runner.results().await;
    print_summary(&summary);

    let path = report_path(&output_dir, format.extension());
    write_report(format, &summary, &results, Some(&path))
        .with_context(|| format!("failed to write report {}", path.display()))?;
    println!("\nReport written to {}", path.display());
    Ok(())
}

/// Builds the run configuration from an optional file and the flags.
fn build_run_config(args: RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_yaml_file(path)?,
        None => RunConfig::new(DEFAULT_TASK_DIR),
    };

    if let Some(dir) = args.task_dir {
        config.task_dir = dir;
    }
    if let Some(pattern) = args.task_pattern {
        config.task_pattern = Some(pattern);
    }
    if let Some(difficulty) = args.difficulty {
        config.difficulty = Some(difficulty);
    }
    if let Some(categories) = args.categories.as_deref() {
        config.categories = split_and_trim(categories);
    }
    if let Some(tags) = args.tags.as_deref() {
        config.tags = split_and_trim(tags);
    }

    let mut models = match (args.models.as_deref(), args.llm_model.as_deref()) {
        (Some(models), _) => LlmConfig::parse_models(models),
        (None, Some(model)) => vec![LlmConfig::new(args.llm_provider.as_str(), model)],
        (None, None) => Vec::new(),
    };
    if !models.is_empty() {
        for llm in &mut models {
            if let Some(endpoint) = &args.llm_endpoint {
                llm.endpoint = Some(endpoint.clone());
            }
            llm.temperature = args.temperature;
            llm.enable_tool_use = args.enable_tool_use;
            llm.auto_approve = args.auto_approve;
        }
        config.llm_configs = models;
    }

    let api_key = args
        .api_key
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.is_empty());
    if let Some(key) = api_key {
        for llm in &mut config.llm_configs {
            if llm.api_key.is_none() {
                llm.api_key = Some(key.clone());
            }
        }
    }

    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(timeout) = args.timeout {
        humantime::parse_duration(&timeout)
            .with_context(|| format!("invalid --timeout value: {}", timeout))?;
        config.default_timeout = timeout;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }

    if let Some(provider) = args.cluster_provider {
        config.cluster_provider = provider;
    }
    if args.kubeconfig.is_some() {
        config.kubeconfig = args.kubeconfig;
    }
    if args.cluster_name.is_some() {
        config.cluster_name = args.cluster_name;
    }
    if let Some(policy) = args.cluster_policy {
        config.cluster_creation_policy = policy;
    }
    if args.host_kubeconfig.is_some() {
        config.host_kubeconfig = args.host_kubeconfig;
    }
    if args.kind_image.is_some() {
        config.kind_image = args.kind_image;
    }

    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(format) = args.output_format {
        config.output_format = format;
    }
    config.save_trace |= args.save_trace;
    config.save_log |= args.save_log;

    if args.agent_bin.is_some() {
        config.agent_bin = args.agent_bin;
    }
    if let Some(agent_args) = args.agent_args.as_deref() {
        config.agent_args = split_and_trim(agent_args);
    }
    config.enable_tool_use_shim |= args.enable_tool_use_shim;
    if let Some(turns) = args.agent_max_turns {
        config.agent_max_turns = turns;
    }
    if let Some(tokens) = args.agent_max_tokens {
        config.agent_max_tokens = tokens;
    }
    if args.agent_system_prompt.is_some() {
        config.agent_system_prompt = args.agent_system_prompt;
    }
    config.quiet |= args.quiet;

    config.apply_defaults();
    Ok(config)
}

fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let results = load_results(&args.input_dir)
        .with_context(|| format!("failed to load results from {}", args.input_dir.display()))?;
    if results.is_empty() {
        anyhow::bail!("no results found in {}", args.input_dir.display());
    }
    info!(count = results.len(), dir = %args.input_dir.display(), "Loaded results");

    let summary = analyze(&results);
    write_report(args.output_format, &summary, &results, args.output.as_deref())?;
    if let Some(path) = &args.output {
        println!("Report written to {}", path.display());
    }

    if args.show_failures {
        print_failures(&results);
    }
    Ok(())
}

fn print_failures(results: &[crate::runner::EvalResult]) {
    let failed = failed_results(results);
    if failed.is_empty() {
        println!("\nNo failures found!");
        return;
    }

    println!("\nFailed evaluations ({}):", failed.len());
    for result in failed {
        println!("\n  {} ({}) - {}", result.task_id, result.llm_config.id, result.result);
        if !result.error.is_empty() {
            println!("    error: {}", result.error);
        }
        for failure in &result.failures {
            println!("    {}: {}", failure.failure_type, failure.message);
        }
    }
}

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let tasks = load_tasks(&args.task_dir)
        .with_context(|| format!("failed to load tasks from {}", args.task_dir.display()))?;
    let opts = FilterOptions {
        pattern: args.task_pattern,
        difficulty: args.difficulty,
        categories: args.categories.as_deref().map(split_and_trim).unwrap_or_default(),
        tags: Vec::new(),
        include_disabled: args.all,
    };
    let tasks = filter_tasks(&tasks, &opts)?;

    print!("{}", task_table(&tasks));
    println!("\nTotal: {} tasks in {}", tasks.len(), args.task_dir.display());
    Ok(())
}

/// Fixed-width task table with a header row.
fn task_table(tasks: &[Task]) -> String {
    let mut out = format!("{:<25} {:<10} {:<15} {}\n", "ID", "DIFFICULTY", "CATEGORY", "NAME");
    out.push_str(&format!("{}\n", "-".repeat(70)));
    for task in tasks {
        out.push_str(&format!(
            "{:<25} {:<10} {:<15} {}\n",
            task.id,
            task.difficulty.as_str(),
            task.category,
            truncate_to(task.display_name(), 40)
        ));
    }
    out
}
