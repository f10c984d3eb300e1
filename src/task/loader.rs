//! Task discovery and filtering.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::types::{Difficulty, Prompt, Task, DEFAULT_TASK_TIMEOUT};
use crate::error::LoaderError;

/// Name of the task definition file inside each task directory.
pub const TASK_FILE: &str = "task.yaml";

/// Criteria for selecting tasks. Filters are ANDed; values inside one filter are ORed.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Regex matched against task ids.
    pub pattern: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub include_disabled: bool,
}

/// Loads every task found in the immediate subdirectories of `base_dir`.
///
/// Subdirectories without a `task.yaml` are skipped. A task that fails to
/// parse, references a missing prompt file, or has an empty script fails the
/// whole load. Tasks are returned sorted by id.
pub fn load_tasks(base_dir: impl AsRef<Path>) -> Result<Vec<Task>, LoaderError> {
    let base_dir = base_dir.as_ref();
    let base_dir = std::path::absolute(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());

    let entries = fs::read_dir(&base_dir).map_err(|source| LoaderError::ReadDir {
        path: base_dir.clone(),
        source,
    })?;

    let mut task_dirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoaderError::ReadDir {
            path: base_dir.clone(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() && path.join(TASK_FILE).is_file() {
            task_dirs.push(path);
        }
    }

    let mut tasks = Vec::with_capacity(task_dirs.len());
    for dir in task_dirs {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut task = load_task(&dir).map_err(|reason| LoaderError::task(&dir_name, reason))?;
        if task.id.is_empty() {
            task.id = dir_name;
        }
        task.dir = dir;
        tasks.push(task);
    }

    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(count = tasks.len(), dir = %base_dir.display(), "Loaded tasks");
    Ok(tasks)
}

/// Parses one task directory and applies defaults, except the id.
fn load_task(dir: &Path) -> Result<Task, String> {
    let content = fs::read_to_string(dir.join(TASK_FILE))
        .map_err(|e| format!("failed to read task file: {}", e))?;
    let mut task: Task =
        serde_yaml::from_str(&content).map_err(|e| format!("failed to parse task YAML: {}", e))?;

    for prompt in &mut task.script {
        if let Some(file) = prompt.file.as_deref().filter(|f| !f.is_empty()) {
            prompt.text = fs::read_to_string(dir.join(file))
                .map_err(|e| format!("failed to read prompt file {}: {}", file, e))?;
        }
    }

    if task.script.is_empty() {
        if let Some(legacy) = task.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            task.script.push(Prompt::text(legacy));
        }
    }
    if task.script.is_empty() {
        return Err("task must have at least one prompt in script".to_string());
    }

    if task.timeout.is_empty() {
        task.timeout = DEFAULT_TASK_TIMEOUT.to_string();
    }

    Ok(task)
}

/// Applies `opts` to `tasks`, preserving order.
///
/// Order of checks: disabled, id pattern, difficulty, category, tags.
pub fn filter_tasks(tasks: &[Task], opts: &FilterOptions) -> Result<Vec<Task>, LoaderError> {
    let pattern = match opts.pattern.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => Some(Regex::new(p)?),
        None => None,
    };

    let filtered = tasks
        .iter()
        .filter(|task| opts.include_disabled || !task.disabled)
        .filter(|task| pattern.as_ref().is_none_or(|re| re.is_match(&task.id)))
        .filter(|task| opts.difficulty.is_none_or(|d| task.difficulty == d))
        .filter(|task| opts.categories.is_empty() || opts.categories.contains(&task.category))
        .filter(|task| opts.tags.is_empty() || task.tags.iter().any(|t| opts.tags.contains(t)))
        .cloned()
        .collect();

    Ok(filtered)
}
