//! Task definition types as read from `task.yaml`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Timeout applied to tasks that do not declare one.
pub const DEFAULT_TASK_TIMEOUT: &str = "10m";

/// Difficulty level of a benchmark task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// All difficulties in report order.
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("Unknown difficulty: {}", other)),
        }
    }
}

/// Isolation level a task asks for.
///
/// Only namespace isolation is enforced by the runner; the field is kept so
/// task files that declare it still parse and round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskIsolation {
    Namespace,
    Cluster,
    #[default]
    #[serde(rename = "")]
    None,
}

impl TaskIsolation {
    fn is_none(&self) -> bool {
        *self == TaskIsolation::None
    }
}

/// A single prompt in a task script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Inline prompt text. Replaced by the file content when `file` is set.
    #[serde(rename = "prompt", default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Prompt file, relative to the task directory.
    #[serde(rename = "promptFile", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Condition to wait for before the next prompt. Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    /// Per-prompt timeout. Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl Prompt {
    /// Creates an inline prompt.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// An expectation on the agent's output.
///
/// Exactly one of `contains` / `not_contains` is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    /// Regex that must match the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Regex that must not match the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_contains: Option<String>,
    /// Reserved. Parsed but never evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl Expectation {
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self {
            contains: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn not_contains(pattern: impl Into<String>) -> Self {
        Self {
            not_contains: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// A benchmark task definition loaded from `task.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task identifier. Defaults to the directory name.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Prompts sent to the agent, in order.
    #[serde(default)]
    pub script: Vec<Prompt>,
    /// Legacy single prompt, folded into `script` at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
    /// Duration string such as `10m` or `1h30m`.
    #[serde(default)]
    pub timeout: String,
    #[serde(default, skip_serializing_if = "TaskIsolation::is_none")]
    pub isolation: TaskIsolation,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect: Vec<Expectation>,

    /// Absolute directory of the task, set by the loader.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl Task {
    /// Returns all prompt texts joined with newlines.
    pub fn task_script(&self) -> String {
        self.script
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns the prompt texts in order.
    pub fn prompts(&self) -> Vec<String> {
        self.script.iter().map(|p| p.text.clone()).collect()
    }

    pub fn setup_path(&self) -> Option<PathBuf> {
        self.resolve(self.setup.as_deref())
    }

    pub fn verifier_path(&self) -> Option<PathBuf> {
        self.resolve(self.verifier.as_deref())
    }

    pub fn cleanup_path(&self) -> Option<PathBuf> {
        self.resolve(self.cleanup.as_deref())
    }

    /// Returns true when the task ships an `artifacts/` directory.
    pub fn has_artifacts(&self) -> bool {
        self.artifacts_dir().is_dir()
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join("artifacts")
    }

    /// Returns the display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    fn resolve(&self, rel: Option<&str>) -> Option<PathBuf> {
        match rel {
            Some(rel) if !rel.is_empty() => Some(self.dir.join(rel)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_in(dir: &str) -> Task {
        Task {
            id: "t".into(),
            dir: PathBuf::from(dir),
            ..Task::default()
        }
    }

    #[test]
    fn test_task_script_joins_prompts() {
        let mut task = task_in("/tasks/t");
        task.script = vec![Prompt::text("Create a pod"), Prompt::text("Then scale it")];
        assert_eq!(task.task_script(), "Create a pod\nThen scale it");

        task.script.clear();
        assert_eq!(task.task_script(), "");
    }

    #[test]
    fn test_script_paths() {
        let mut task = task_in("/tasks/t");
        assert!(task.setup_path().is_none());
        assert!(task.verifier_path().is_none());
        assert!(task.cleanup_path().is_none());

        task.setup = Some("setup.sh".into());
        task.verifier = Some("verify.sh".into());
        task.cleanup = Some(String::new());
        assert_eq!(task.setup_path(), Some(PathBuf::from("/tasks/t/setup.sh")));
        assert_eq!(task.verifier_path(), Some(PathBuf::from("/tasks/t/verify.sh")));
        assert!(task.cleanup_path().is_none());
    }

    #[test]
    fn test_has_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let task = task_in(tmp.path().to_str().unwrap());
        assert!(!task.has_artifacts());

        std::fs::create_dir(tmp.path().join("artifacts")).unwrap();
        assert!(task.has_artifacts());
        assert_eq!(task.artifacts_dir(), tmp.path().join("artifacts"));
    }

    #[test]
    fn test_difficulty_parse_and_display() {
        assert_eq!("easy".parse::<Difficulty>().unwrap(), Difficulty::Easy);
        assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("extreme".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::Medium.to_string(), "medium");
        assert_eq!(Difficulty::default(), Difficulty::Medium);
    }

    #[test]
    fn test_task_yaml_keys() {
        let yaml = r#"
name: Create nginx
script:
  - prompt: "Create an nginx pod"
  - promptFile: followup.md
    waitFor: pod-ready
expect:
  - contains: "created"
  - notContains: "error"
  - exitCode: 0
isolation: namespace
unknownField: ignored
"#;
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.script.len(), 2);
        assert_eq!(task.script[1].file.as_deref(), Some("followup.md"));
        assert_eq!(task.script[1].wait_for.as_deref(), Some("pod-ready"));
        assert_eq!(task.expect[1].not_contains.as_deref(), Some("error"));
        assert_eq!(task.expect[2].exit_code, Some(0));
        assert_eq!(task.isolation, TaskIsolation::Namespace);
        assert_eq!(task.difficulty, Difficulty::Medium);
    }
}
