//! Configuration for benchmark runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;
use crate::report::OutputFormat;
use crate::task::{Difficulty, FilterOptions, DEFAULT_TASK_TIMEOUT};

/// Default directory for results.
pub const DEFAULT_OUTPUT_DIR: &str = ".build";

/// Default number of tool-calling rounds for the built-in agent.
pub const DEFAULT_AGENT_MAX_TURNS: u32 = 10;

/// How the runner obtains its cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterPolicy {
    /// Delete any existing cluster of that name, then create a fresh one.
    Always,
    /// Reuse the cluster if present, otherwise create it.
    #[default]
    CreateIfNot,
    /// Never create; fail when the cluster is absent.
    DoNotCreate,
}

impl std::fmt::Display for ClusterPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPolicy::Always => write!(f, "always"),
            ClusterPolicy::CreateIfNot => write!(f, "create_if_not"),
            ClusterPolicy::DoNotCreate => write!(f, "do_not_create"),
        }
    }
}

impl std::str::FromStr for ClusterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(ClusterPolicy::Always),
            "" | "create_if_not" => Ok(ClusterPolicy::CreateIfNot),
            "do_not_create" => Ok(ClusterPolicy::DoNotCreate),
            other => Err(format!("Unknown cluster creation policy: {}", other)),
        }
    }
}

/// One language model under evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Unique identifier, used in file names and report keys.
    pub id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Never written to result files.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub enable_tool_use: bool,
    #[serde(default)]
    pub auto_approve: bool,
}

impl LlmConfig {
    /// Creates a config with id `<provider>-<model>`.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let provider = provider.into();
        let model = model.into();
        Self {
            id: format!("{}-{}", provider, model),
            provider,
            model,
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_tool_use(mut self, enable: bool, auto_approve: bool) -> Self {
        self.enable_tool_use = enable;
        self.auto_approve = auto_approve;
        self
    }

    /// Parses `provider:model,provider:model`. Entries without a provider use `openai`.
    pub fn parse_models(models: &str) -> Vec<LlmConfig> {
        split_and_trim(models)
            .into_iter()
            .map(|entry| match entry.split_once(':') {
                Some((provider, model)) => LlmConfig::new(provider, model),
                None => LlmConfig::new("openai", entry),
            })
            .collect()
    }
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_and_trim(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration for a benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    // Task selection
    pub task_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    // Models
    pub llm_configs: Vec<LlmConfig>,

    // Execution
    pub parallelism: usize,
    /// Fallback when a task's own timeout is missing or unparsable.
    pub default_timeout: String,
    /// Extra attempts for pairings that end in error or timeout.
    pub retries: u32,

    // Cluster
    /// `kind`, `vcluster` or `existing`.
    pub cluster_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    pub cluster_creation_policy: ClusterPolicy,
    /// Host kubeconfig for vcluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_kubeconfig: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind_image: Option<String>,

    // Output
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    pub save_trace: bool,
    pub save_log: bool,

    // External agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_bin: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agent_args: Vec<String>,
    pub enable_tool_use_shim: bool,
    /// 0 means the agent's own default.
    pub agent_max_turns: u32,
    /// 0 means the agent's own default.
    pub agent_max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_system_prompt: Option<String>,

    /// Suppress per-task progress lines.
    pub quiet: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task_dir: PathBuf::new(),
            task_pattern: None,
            difficulty: None,
            categories: Vec::new(),
            tags: Vec::new(),
            llm_configs: Vec::new(),
            parallelism: 1,
            default_timeout: DEFAULT_TASK_TIMEOUT.to_string(),
            retries: 0,
            cluster_provider: "existing".to_string(),
            kubeconfig: None,
            cluster_name: None,
            cluster_creation_policy: ClusterPolicy::default(),
            host_kubeconfig: None,
            kind_image: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_format: OutputFormat::default(),
            save_trace: false,
            save_log: false,
            agent_bin: None,
            agent_args: Vec::new(),
            enable_tool_use_shim: false,
            agent_max_turns: 0,
            agent_max_tokens: 0,
            agent_system_prompt: None,
            quiet: false,
        }
    }
}

impl RunConfig {
    /// Creates a run configuration with defaults.
    pub fn new(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_dir: task_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let mut config: RunConfig = serde_yaml::from_str(&content)?;
        config.apply_defaults();
        Ok(config)
    }

    /// Adds a model to evaluate.
    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm_configs.push(llm);
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.default_timeout = timeout.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_agent_bin(mut self, bin: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.agent_bin = Some(bin.into());
        self.agent_args = args;
        self
    }

    pub fn with_cluster_policy(mut self, policy: ClusterPolicy) -> Self {
        self.cluster_creation_policy = policy;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Fills zero or empty values with their defaults.
    pub fn apply_defaults(&mut self) {
        if self.default_timeout.is_empty() {
            self.default_timeout = DEFAULT_TASK_TIMEOUT.to_string();
        }
        if self.parallelism == 0 {
            self.parallelism = 1;
        }
        if self.output_dir.as_os_str().is_empty() {
            self.output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        }
    }

    /// Checks the settings a run cannot start without.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.task_dir.as_os_str().is_empty() {
            return Err(RunnerError::Config("task directory is required".to_string()));
        }
        match std::fs::metadata(&self.task_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RunnerError::TaskDirNotAccessible(format!(
                    "{} is not a directory",
                    self.task_dir.display()
                )))
            }
            Err(e) => {
                return Err(RunnerError::TaskDirNotAccessible(format!(
                    "{}: {}",
                    self.task_dir.display(),
                    e
                )))
            }
        }

        if self.llm_configs.is_empty() {
            return Err(RunnerError::Config(
                "at least one LLM config is required".to_string(),
            ));
        }
        for (i, llm) in self.llm_configs.iter().enumerate() {
            if llm.id.is_empty() {
                return Err(RunnerError::Config(format!(
                    "LLM config #{}: ID is required",
                    i + 1
                )));
            }
            if llm.provider.is_empty() && llm.endpoint.as_deref().unwrap_or_default().is_empty() {
                return Err(RunnerError::Config(format!(
                    "LLM config #{} ({}): provider or endpoint is required",
                    i + 1,
                    llm.id
                )));
            }
        }
        Ok(())
    }

    /// Task filter derived from the selection settings.
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            pattern: self.task_pattern.clone(),
            difficulty: self.difficulty,
            categories: self.categories.clone(),
            tags: self.tags.clone(),
            include_disabled: false,
        }
    }

    /// Parsed `default_timeout`, falling back to ten minutes.
    pub fn default_timeout(&self) -> Duration {
        humantime::parse_duration(&self.default_timeout)
            .unwrap_or_else(|_| Duration::from_secs(600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::new("./tasks");
        assert_eq!(config.task_dir, PathBuf::from("./tasks"));
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.default_timeout, "10m");
        assert_eq!(config.default_timeout(), Duration::from_secs(600));
        assert_eq!(config.output_dir, PathBuf::from(".build"));
        assert_eq!(config.cluster_creation_policy, ClusterPolicy::CreateIfNot);
        assert_eq!(config.output_format, OutputFormat::Markdown);
    }

    #[test]
    fn test_apply_defaults() {
        let mut config = RunConfig {
            parallelism: 0,
            default_timeout: String::new(),
            output_dir: PathBuf::new(),
            ..RunConfig::default()
        };
        config.apply_defaults();
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.default_timeout, "10m");
        assert_eq!(config.output_dir, PathBuf::from(".build"));
    }

    #[test]
    fn test_validate() {
        let tmp = TempDir::new().unwrap();

        let err = RunConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("task directory is required"));

        let err = RunConfig::new(tmp.path().join("missing")).validate().unwrap_err();
        assert!(matches!(err, RunnerError::TaskDirNotAccessible(_)));

        let err = RunConfig::new(tmp.path()).validate().unwrap_err();
        assert!(err.to_string().contains("at least one LLM config"));

        let mut llm = LlmConfig::new("openai", "gpt-4o");
        llm.id.clear();
        let err = RunConfig::new(tmp.path()).with_llm(llm).validate().unwrap_err();
        assert!(err.to_string().contains("LLM config #1: ID is required"));

        let llm = LlmConfig {
            id: "bare".into(),
            ..LlmConfig::default()
        };
        let err = RunConfig::new(tmp.path()).with_llm(llm).validate().unwrap_err();
        assert!(err.to_string().contains("provider or endpoint is required"));

        let llm = LlmConfig {
            id: "gw".into(),
            endpoint: Some("http://gateway:4000/v1".into()),
            ..LlmConfig::default()
        };
        RunConfig::new(tmp.path()).with_llm(llm).validate().unwrap();
    }

    #[test]
    fn test_parse_models() {
        let models = LlmConfig::parse_models("openai:gpt-4o, anthropic:claude-sonnet ,llama3,");
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["openai-gpt-4o", "anthropic-claude-sonnet", "openai-llama3"]);
        assert_eq!(models[1].provider, "anthropic");
        assert_eq!(models[1].model, "claude-sonnet");

        // Only the first colon separates provider from model.
        let models = LlmConfig::parse_models("ollama:qwen2.5:7b");
        assert_eq!(models[0].provider, "ollama");
        assert_eq!(models[0].model, "qwen2.5:7b");
    }

    #[test]
    fn test_split_and_trim() {
        assert!(split_and_trim("").is_empty());
        assert_eq!(split_and_trim(" a, b ,,c "), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cluster_policy_parse() {
        assert_eq!("always".parse::<ClusterPolicy>().unwrap(), ClusterPolicy::Always);
        assert_eq!("".parse::<ClusterPolicy>().unwrap(), ClusterPolicy::CreateIfNot);
        assert_eq!(
            "do_not_create".parse::<ClusterPolicy>().unwrap(),
            ClusterPolicy::DoNotCreate
        );
        assert!("sometimes".parse::<ClusterPolicy>().is_err());
        assert_eq!(ClusterPolicy::DoNotCreate.to_string(), "do_not_create");
    }

    #[test]
    fn test_from_yaml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bench.yaml");
        std::fs::write(
            &path,
            r#"
taskDir: ./tasks
parallelism: 4
clusterProvider: kind
clusterCreationPolicy: always
outputFormat: json
llmConfigs:
  - id: gpt
    provider: openai
    model: gpt-4o
    apiKey: secret
    enableToolUse: true
"#,
        )
        .unwrap();

        let config = RunConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.cluster_provider, "kind");
        assert_eq!(config.cluster_creation_policy, ClusterPolicy::Always);
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.default_timeout, "10m");
        assert_eq!(config.llm_configs[0].api_key.as_deref(), Some("secret"));
        assert!(config.llm_configs[0].enable_tool_use);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let llm = LlmConfig::new("openai", "gpt-4o").with_api_key("sk-secret");
        let json = serde_json::to_string(&llm).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("\"id\":\"openai-gpt-4o\""));
    }
}
