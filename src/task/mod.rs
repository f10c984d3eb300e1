//! Benchmark task definitions.
//!
//! Each task lives in its own directory with a `task.yaml`, optional prompt
//! files and optional `setup`/`verifier`/`cleanup` shell scripts:
//!
//! ```text
//! tasks/
//! ├── create-nginx-pod/
//! │   ├── task.yaml
//! │   ├── prompt.md
//! │   ├── setup.sh
//! │   └── verify.sh
//! └── fix-crashloop/
//!     └── task.yaml
//! ```

pub mod loader;
pub mod types;

pub use loader::{filter_tasks, load_tasks, FilterOptions, TASK_FILE};
pub use types::{Difficulty, Expectation, Prompt, Task, TaskIsolation, DEFAULT_TASK_TIMEOUT};
