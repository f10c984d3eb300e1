//! Benchmark runner - the evaluation pipeline and its worker pool.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::agents::{create_adapter, AgentAdapter, AgentOutput, AgentRequest};
use super::config::{ClusterPolicy, LlmConfig, RunConfig};
use super::expectations::check_expectations;
use super::result::{BenchmarkSummary, EvalResult, Failure, TaskResult};
use super::script::{namespace_name, run_script, KubectlNamespaceManager, NamespaceManager};
use crate::cluster::{create_provider, ClusterProvider, ProviderConfig, ProviderKind};
use crate::error::{ClusterError, RunnerError};
use crate::report::{analyze, format_duration};
use crate::task::{filter_tasks, load_tasks, Task};

/// Deadline used when neither the task nor the run timeout fits on the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Why a guarded stage stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Deadline,
    Cancelled,
}

/// Aborts every in-flight stage of a run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolves once the run is cancelled. Never resolves if the runner is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Everything a worker needs to evaluate one pairing.
#[derive(Clone)]
struct Pipeline {
    config: Arc<RunConfig>,
    run_id: String,
    cluster_name: String,
    provider: Arc<dyn ClusterProvider>,
    namespaces: Arc<dyn NamespaceManager>,
    agent: Arc<dyn AgentAdapter>,
    cancel: watch::Receiver<bool>,
}

/// Runs tasks × models through the evaluation pipeline.
pub struct Runner {
    pipeline: Pipeline,
    cancel: Arc<watch::Sender<bool>>,
    results: Arc<Mutex<Vec<EvalResult>>>,
}

impl Runner {
    /// Validates `config` and prepares a run with a fresh run id.
    pub fn new(mut config: RunConfig) -> Result<Self, RunnerError> {
        config.apply_defaults();
        config.validate()?;

        let kind = config
            .cluster_provider
            .parse::<ProviderKind>()
            .map_err(|e| RunnerError::Config(e.to_string()))?;

        let mut provider_config = ProviderConfig::new().with_work_dir(config.output_dir.clone());
        if let Some(image) = &config.kind_image {
            provider_config = provider_config.with_kind_image(image.clone());
        }
        if let Some(host) = config.host_kubeconfig.as_ref().or(config.kubeconfig.as_ref()) {
            provider_config = provider_config.with_vcluster_kubeconfig(host.clone());
        }
        if let Some(kubeconfig) = &config.kubeconfig {
            provider_config = provider_config.with_existing_kubeconfig(kubeconfig.clone());
        }
        let provider = create_provider(kind, provider_config);

        let run_id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        let cluster_name = config
            .cluster_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("kube-bench-{}", run_id));
        let agent = create_adapter(&config);
        let (tx, rx) = watch::channel(false);

        Ok(Self {
            pipeline: Pipeline {
                config: Arc::new(config),
                run_id,
                cluster_name,
                provider,
                namespaces: Arc::new(KubectlNamespaceManager),
                agent,
                cancel: rx,
            },
            cancel: Arc::new(tx),
            results: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn with_cluster_provider(mut self, provider: Arc<dyn ClusterProvider>) -> Self {
        self.pipeline.provider = provider;
        self
    }

    pub fn with_namespace_manager(mut self, namespaces: Arc<dyn NamespaceManager>) -> Self {
        self.pipeline.namespaces = namespaces;
        self
    }

    pub fn with_agent(mut self, agent: Arc<dyn AgentAdapter>) -> Self {
        self.pipeline.agent = agent;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.pipeline.run_id
    }

    pub fn cluster_name(&self) -> &str {
        &self.pipeline.cluster_name
    }

    pub fn config(&self) -> &RunConfig {
        &self.pipeline.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Results collected so far, in completion order.
    pub async fn results(&self) -> Vec<EvalResult> {
        self.results.lock().await.clone()
    }

    /// Runs the benchmark and returns its summary.
    pub async fn run(&self) -> Result<BenchmarkSummary, RunnerError> {
        let started = Utc::now();
        let config = &self.pipeline.config;

        std::fs::create_dir_all(&config.output_dir).map_err(|source| RunnerError::OutputDir {
            path: config.output_dir.clone(),
            source,
        })?;

        let tasks = load_tasks(&config.task_dir)?;
        let tasks = filter_tasks(&tasks, &config.filter_options())?;
        if tasks.is_empty() {
            return Err(RunnerError::NoTasks);
        }
        info!(
            run_id = %self.pipeline.run_id,
            tasks = tasks.len(),
            llms = config.llm_configs.len(),
            "Found tasks to evaluate"
        );

        self.setup_cluster().await?;

        let work: Vec<(Arc<Task>, LlmConfig)> = tasks
            .into_iter()
            .map(Arc::new)
            .flat_map(|task| {
                config
                    .llm_configs
                    .iter()
                    .map(move |llm| (Arc::clone(&task), llm.clone()))
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
        let (tx, mut rx) = mpsc::channel::<EvalResult>(work.len().max(1));

        for (task, llm) in work {
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let pipeline = self.pipeline.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let mut result = pipeline.evaluate_isolated(task, llm).await;
                if let Err(e) = pipeline.save_result(&mut result).await {
                    warn!(task_id = %result.task_id, error = %e, "Failed to save result");
                }
                let _ = tx.send(result).await;
            });
        }
        // Workers hold the remaining senders; the loop ends when the last one finishes.
        drop(tx);

        while let Some(result) = rx.recv().await {
            if !config.quiet {
                println!("{}", progress_line(&result));
            }
            self.results.lock().await.push(result);
        }

        let finished = Utc::now();
        let results = self.results.lock().await;
        let mut summary = analyze(&results);
        summary.run_id = self.pipeline.run_id.clone();
        summary.start_time = started;
        summary.end_time = finished;
        summary.duration = (finished - started).to_std().unwrap_or_default();

        info!(
            run_id = %summary.run_id,
            total = summary.total_tasks,
            success = summary.success_count,
            "Benchmark run complete"
        );
        Ok(summary)
    }

    /// Applies the cluster creation policy once for the run.
    pub async fn setup_cluster(&self) -> Result<(), RunnerError> {
        let name = self.pipeline.cluster_name.as_str();
        let provider = &self.pipeline.provider;
        let policy = self.pipeline.config.cluster_creation_policy;

        let exists = provider.exists(name).await?;
        debug!(cluster = %name, provider = provider.name(), exists, policy = %policy, "Resolving cluster");

        match policy {
            ClusterPolicy::DoNotCreate => {
                if !exists {
                    error!(cluster = %name, "Cluster does not exist");
                    return Err(ClusterError::NotFound(name.to_string()).into());
                }
                info!(cluster = %name, "Using existing cluster");
            }
            ClusterPolicy::Always => {
                if exists {
                    info!(cluster = %name, "Deleting existing cluster");
                    provider.delete(name).await?;
                }
                info!(cluster = %name, "Creating cluster");
                provider.create(name).await?;
            }
            ClusterPolicy::CreateIfNot => {
                if exists {
                    info!(cluster = %name, "Using existing cluster");
                } else {
                    info!(cluster = %name, "Creating cluster");
                    provider.create(name).await?;
                }
            }
        }
        Ok(())
    }

    /// Evaluates one task with one model, without retries or persistence.
    pub async fn evaluate_task(&self, task: &Task, llm: &LlmConfig) -> EvalResult {
        self.pipeline.evaluate_task(task, llm, 1).await
    }
}

impl Pipeline {
    /// Evaluates in a task of its own so that a panic becomes an `error`
    /// result instead of a missing one.
    async fn evaluate_isolated(&self, task: Arc<Task>, llm: LlmConfig) -> EvalResult {
        let pipeline = self.clone();
        let (inner_task, inner_llm) = (Arc::clone(&task), llm.clone());
        let handle =
            tokio::spawn(async move { pipeline.evaluate_with_retries(&inner_task, &inner_llm).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(task_id = %task.id, llm = %llm.id, error = %e, "Evaluation aborted");
                let mut result = EvalResult::new(&task, &llm, &self.run_id, 1);
                result.finish_with_error(TaskResult::Error, format!("evaluation aborted: {}", e));
                result
            }
        }
    }

    async fn evaluate_with_retries(&self, task: &Task, llm: &LlmConfig) -> EvalResult {
        let attempts = self.config.retries + 1;
        let mut attempt = 1;
        loop {
            let result = self.evaluate_task(task, llm, attempt).await;
            if attempt >= attempts || !result.result.is_retryable() || *self.cancel.borrow() {
                return result;
            }
            info!(
                task_id = %task.id,
                llm = %llm.id,
                attempt,
                result = %result.result,
                "Retrying evaluation"
            );
            attempt += 1;
        }
    }

    /// Runs `fut` until it finishes, the deadline passes or the run is cancelled.
    async fn guarded<F: Future>(&self, deadline: Instant, fut: F) -> Result<F::Output, Interrupt> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            res = timeout_at(deadline, fut) => res.map_err(|_| Interrupt::Deadline),
            _ = cancelled(&mut cancel) => Err(Interrupt::Cancelled),
        }
    }

    /// Task timeout and its deadline. Unparseable timeouts and ones too large
    /// for the clock fall back to the run default.
    fn deadline_for(&self, task: &Task) -> (Duration, Instant) {
        let now = Instant::now();
        let requested = humantime::parse_duration(&task.timeout).ok();
        [requested, Some(self.config.default_timeout())]
            .into_iter()
            .flatten()
            .find_map(|timeout| now.checked_add(timeout).map(|deadline| (timeout, deadline)))
            .unwrap_or((FAR_FUTURE, now + FAR_FUTURE))
    }

    async fn evaluate_task(&self, task: &Task, llm: &LlmConfig, attempt: u32) -> EvalResult {
        let mut result = EvalResult::new(task, llm, &self.run_id, attempt);
        let (timeout, deadline) = self.deadline_for(task);

        debug!(task_id = %task.id, llm = %llm.id, attempt, ?timeout, "Evaluating task");

        let kubeconfig = match self
            .guarded(deadline, self.provider.kubeconfig_path(&self.cluster_name))
            .await
        {
            Ok(Ok(path)) => path.to_string_lossy().into_owned(),
            Ok(Err(e)) => {
                result.finish_with_error(TaskResult::Error, format!("failed to get kubeconfig: {}", e));
                return result;
            }
            Err(interrupt) => {
                let outcome = interrupted(&mut result, interrupt);
                result.finish(outcome);
                return result;
            }
        };
        result.kubeconfig = kubeconfig.clone();

        let namespace = namespace_name(&task.id, &self.run_id);
        match self
            .guarded(deadline, self.namespaces.create(&kubeconfig, &namespace))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                result.finish_with_error(TaskResult::Error, format!("failed to create namespace: {}", e));
                return result;
            }
            Err(interrupt) => {
                let outcome = interrupted(&mut result, interrupt);
                result.finish(outcome);
                return result;
            }
        }

        let outcome = self
            .run_stages(task, llm, &kubeconfig, &namespace, deadline, &mut result)
            .await;

        // Cleanup follows a passing verifier only, and runs outside the task deadline.
        if outcome == TaskResult::Success {
            if let Some(cleanup) = task.cleanup_path() {
                let out = run_script(&cleanup, &task.dir, &kubeconfig, &namespace).await;
                if let Some(e) = &out.error {
                    warn!(task_id = %task.id, error = %e, "Cleanup script failed");
                }
                result.cleanup_log = out.log;
            }
        }
        result.finish(outcome);

        if let Err(e) = self.namespaces.delete(&kubeconfig, &namespace).await {
            warn!(namespace = %namespace, error = %e, "Failed to delete namespace");
        }
        result
    }

    /// Setup, agent, expectations and verifier. Records logs, errors and
    /// failures on `result` and returns the outcome.
    async fn run_stages(
        &self,
        task: &Task,
        llm: &LlmConfig,
        kubeconfig: &str,
        namespace: &str,
        deadline: Instant,
        result: &mut EvalResult,
    ) -> TaskResult {
        if let Some(setup) = task.setup_path() {
            match self
                .guarded(deadline, run_script(&setup, &task.dir, kubeconfig, namespace))
                .await
            {
                Ok(out) => {
                    result.setup_log = out.log;
                    if let Some(e) = out.error {
                        result.error = format!("setup failed: {}", e);
                        return TaskResult::Error;
                    }
                }
                Err(interrupt) => return interrupted(result, interrupt),
            }
        }

        let request = AgentRequest {
            task,
            llm,
            kubeconfig,
            namespace,
        };
        let mut output = AgentOutput::new();
        let agent_result = self.guarded(deadline, self.agent.run(request, &mut output)).await;
        result.output = output.text();
        result.trace = output.take_trace();
        match agent_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                result.error = format!("agent failed: {}", e);
                return TaskResult::Error;
            }
            Err(interrupt) => return interrupted(result, interrupt),
        }

        let failures = check_expectations(&result.output, &task.expect);
        if !failures.is_empty() {
            result.failures = failures;
            return TaskResult::Fail;
        }

        if let Some(verifier) = task.verifier_path() {
            match self
                .guarded(deadline, run_script(&verifier, &task.dir, kubeconfig, namespace))
                .await
            {
                Ok(out) => {
                    result.verify_log = out.log;
                    if let Some(e) = out.error {
                        result.failures = vec![Failure::new("verifier", format!("verifier failed: {}", e))
                            .with_actual(result.verify_log.clone())];
                        return TaskResult::Fail;
                    }
                }
                Err(interrupt) => return interrupted(result, interrupt),
            }
        }

        TaskResult::Success
    }

    /// Writes the result file and, when enabled, the trace and log files.
    async fn save_result(&self, result: &mut EvalResult) -> Result<(), RunnerError> {
        let task_dir = self.config.output_dir.join(&result.task_id);
        tokio::fs::create_dir_all(&task_dir).await?;

        let stem = format!(
            "{}_{}",
            result.llm_config.id,
            Local::now().format("%Y%m%d_%H%M%S")
        );

        if self.config.save_trace {
            if let Some(trace) = &result.trace {
                let path = task_dir.join(format!("{}_trace.yaml", stem));
                tokio::fs::write(&path, serde_yaml::to_string(trace)?).await?;
                result.trace_path = path.to_string_lossy().into_owned();
            }
        }

        if self.config.save_log {
            let path = task_dir.join(format!("{}_log.txt", stem));
            tokio::fs::write(&path, build_log_content(result)).await?;
            result.log_path = path.to_string_lossy().into_owned();
        }

        let path = task_dir.join(format!("{}.json", stem));
        tokio::fs::write(&path, serde_json::to_string_pretty(result)?).await?;
        debug!(path = %path.display(), "Saved result");
        Ok(())
    }
}

/// Records an interrupted stage on `result` and returns the outcome.
fn interrupted(result: &mut EvalResult, interrupt: Interrupt) -> TaskResult {
    match interrupt {
        Interrupt::Deadline => {
            result.error = "task timed out".to_string();
            TaskResult::Timeout
        }
        Interrupt::Cancelled => {
            result.error = "run cancelled".to_string();
            TaskResult::Error
        }
    }
}

/// `[✓] task (llm) - result`
pub fn progress_line(result: &EvalResult) -> String {
    let mark = if result.is_success() { "✓" } else { "✗" };
    format!(
        "[{}] {} ({}) - {}",
        mark, result.task_id, result.llm_config.id, result.result
    )
}

/// Human-readable log of one evaluation.
pub fn build_log_content(result: &EvalResult) -> String {
    let mut log = format!(
        "Task: {}\nLLM: {} ({})\nResult: {}\nDuration: {}\nStart: {}\nEnd: {}\n",
        result.task_id,
        result.llm_config.id,
        result.llm_config.model,
        result.result,
        format_duration(result.duration),
        rfc3339(result.start_time),
        rfc3339(result.end_time),
    );

    for (title, body) in [
        ("Setup Log", &result.setup_log),
        ("Agent Output", &result.output),
        ("Verify Log", &result.verify_log),
        ("Cleanup Log", &result.cleanup_log),
    ] {
        log.push_str(&format!("\n--- {} ---\n", title));
        log.push_str(body);
    }

    if !result.error.is_empty() {
        log.push_str("\n--- Error ---\n");
        log.push_str(&result.error);
    }

    if !result.failures.is_empty() {
        log.push_str("\n--- Failures ---\n");
        for (i, failure) in result.failures.iter().enumerate() {
            log.push_str(&format!("{}. {}: {}\n", i + 1, failure.failure_type, failure.message));
        }
    }
    log
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Report path for a finished run.
pub fn report_path(output_dir: &Path, extension: &str) -> std::path::PathBuf {
    output_dir.join(format!("report.{}", extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::agents::AgentError;
    use crate::task::{Expectation, Prompt};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeCluster {
        exists: bool,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeCluster {
        fn existing() -> Arc<Self> {
            Arc::new(Self {
                exists: true,
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterProvider for FakeCluster {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
            self.calls.lock().unwrap().push(format!("exists {}", name));
            Ok(self.exists)
        }

        async fn create(&self, name: &str) -> Result<(), ClusterError> {
            self.calls.lock().unwrap().push(format!("create {}", name));
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<(), ClusterError> {
            self.calls.lock().unwrap().push(format!("delete {}", name));
            Ok(())
        }

        async fn kubeconfig(&self, _name: &str) -> Result<Vec<u8>, ClusterError> {
            Ok(b"apiVersion: v1".to_vec())
        }

        async fn kubeconfig_path(&self, _name: &str) -> Result<PathBuf, ClusterError> {
            Ok(PathBuf::from("/tmp/fake-kubeconfig"))
        }
    }

    #[derive(Default)]
    struct FakeNamespaces {
        fail_create: bool,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeNamespaces {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NamespaceManager for FakeNamespaces {
        async fn create(&self, _kubeconfig: &str, namespace: &str) -> Result<(), ClusterError> {
            self.calls.lock().unwrap().push(format!("create {}", namespace));
            if self.fail_create {
                Err(ClusterError::namespace(namespace, "forbidden"))
            } else {
                Ok(())
            }
        }

        async fn delete(&self, _kubeconfig: &str, namespace: &str) -> Result<(), ClusterError> {
            self.calls.lock().unwrap().push(format!("delete {}", namespace));
            Ok(())
        }
    }

    /// Writes a fixed reply, optionally failing the first few calls,
    /// stalling after the reply or panicking.
    #[derive(Default)]
    struct FakeAgent {
        reply: String,
        fail_first: usize,
        stall: Option<Duration>,
        panics: bool,
        calls: AtomicUsize,
    }

    impl FakeAgent {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl AgentAdapter for FakeAgent {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn run(
            &self,
            _request: AgentRequest<'_>,
            output: &mut AgentOutput,
        ) -> Result<(), AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("agent blew up");
            }
            output.push_str(&self.reply);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if call < self.fail_first {
                return Err(AgentError::Config("model unavailable".into()));
            }
            Ok(())
        }
    }

    fn write_task(root: &Path, id: &str, yaml: &str) -> PathBuf {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("task.yaml"), yaml).unwrap();
        dir
    }

    fn task_in(dir: &Path) -> Task {
        Task {
            id: "create-pod".into(),
            name: "Create pod".into(),
            script: vec![Prompt::text("Create an nginx pod")],
            timeout: "1m".into(),
            dir: dir.to_path_buf(),
            ..Task::default()
        }
    }

    struct Harness {
        runner: Runner,
        namespaces: Arc<FakeNamespaces>,
        _tasks: TempDir,
        _out: TempDir,
    }

    fn harness(agent: FakeAgent, namespaces: FakeNamespaces, adjust: impl FnOnce(RunConfig) -> RunConfig) -> Harness {
        let tasks = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let config = RunConfig::new(tasks.path())
            .with_llm(LlmConfig::new("openai", "gpt-4o"))
            .with_output_dir(out.path())
            .with_quiet(true);
        let namespaces = Arc::new(namespaces);
        let runner = Runner::new(adjust(config))
            .unwrap()
            .with_cluster_provider(FakeCluster::existing())
            .with_namespace_manager(namespaces.clone())
            .with_agent(Arc::new(agent));
        Harness {
            runner,
            namespaces,
            _tasks: tasks,
            _out: out,
        }
    }

    #[test]
    fn test_runner_new() {
        let h = harness(FakeAgent::default(), FakeNamespaces::default(), |c| c);
        assert_eq!(h.runner.run_id().len(), 8);
        assert_eq!(h.runner.cluster_name(), format!("kube-bench-{}", h.runner.run_id()));

        let tmp = TempDir::new().unwrap();
        let mut config = RunConfig::new(tmp.path()).with_llm(LlmConfig::new("openai", "gpt-4o"));
        config.cluster_provider = "minikube".into();
        let err = Runner::new(config).err().unwrap();
        assert!(err.to_string().contains("unknown cluster provider: minikube"));

        let err = Runner::new(RunConfig::new(tmp.path())).err().unwrap();
        assert!(err.to_string().contains("at least one LLM config is required"));
    }

    #[tokio::test]
    async fn test_setup_cluster_policies() {
        let tmp = TempDir::new().unwrap();
        let config = |policy| {
            RunConfig::new(tmp.path())
                .with_llm(LlmConfig::new("openai", "gpt-4o"))
                .with_cluster_policy(policy)
        };

        let absent = Arc::new(FakeCluster::default());
        let runner = Runner::new(config(ClusterPolicy::DoNotCreate))
            .unwrap()
            .with_cluster_provider(absent.clone());
        let err = runner.setup_cluster().await.unwrap_err();
        assert!(matches!(err, RunnerError::Cluster(ClusterError::NotFound(_))));

        let present = FakeCluster::existing();
        let runner = Runner::new(config(ClusterPolicy::Always))
            .unwrap()
            .with_cluster_provider(present.clone());
        runner.setup_cluster().await.unwrap();
        let name = runner.cluster_name().to_string();
        assert_eq!(
            present.calls(),
            vec![format!("exists {}", name), format!("delete {}", name), format!("create {}", name)]
        );

        let absent = Arc::new(FakeCluster::default());
        let runner = Runner::new(config(ClusterPolicy::CreateIfNot))
            .unwrap()
            .with_cluster_provider(absent.clone());
        runner.setup_cluster().await.unwrap();
        assert!(absent.calls().iter().any(|c| c.starts_with("create ")));

        let present = FakeCluster::existing();
        let runner = Runner::new(config(ClusterPolicy::CreateIfNot))
            .unwrap()
            .with_cluster_provider(present.clone());
        runner.setup_cluster().await.unwrap();
        assert_eq!(present.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_success_with_expectations_and_verifier() {
        let h = harness(FakeAgent::replying("pod/nginx created"), FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("verify.sh"), "echo \"verified $NAMESPACE\"\n").unwrap();
        std::fs::write(dir.path().join("cleanup.sh"), "echo cleaned\n").unwrap();
        let mut task = task_in(dir.path());
        task.expect = vec![Expectation::contains("nginx"), Expectation::not_contains("error")];
        task.verifier = Some("verify.sh".into());
        task.cleanup = Some("cleanup.sh".into());

        let llm = LlmConfig::new("openai", "gpt-4o");
        let result = h.runner.evaluate_task(&task, &llm).await;
        let namespace = format!("bench-create-pod-{}", h.runner.run_id());

        assert_eq!(result.result, TaskResult::Success, "error: {}", result.error);
        assert_eq!(result.output, "pod/nginx created");
        assert_eq!(result.verify_log, format!("verified {}\n", namespace));
        assert_eq!(result.cleanup_log, "cleaned\n");
        assert_eq!(result.kubeconfig, "/tmp/fake-kubeconfig");
        assert_eq!(
            h.namespaces.calls(),
            vec![format!("create {}", namespace), format!("delete {}", namespace)]
        );
    }

    #[tokio::test]
    async fn test_failing_setup_skips_cleanup_but_deletes_namespace() {
        let h = harness(FakeAgent::replying("unused"), FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("setup.sh"), "echo preparing\nexit 1\n").unwrap();
        std::fs::write(dir.path().join("cleanup.sh"), "echo cleaned\n").unwrap();
        let mut task = task_in(dir.path());
        task.setup = Some("setup.sh".into());
        task.cleanup = Some("cleanup.sh".into());

        let result = h.runner.evaluate_task(&task, &LlmConfig::new("openai", "gpt-4o")).await;
        assert_eq!(result.result, TaskResult::Error);
        assert!(result.error.starts_with("setup failed: "));
        assert_eq!(result.setup_log, "preparing\n");
        assert!(result.output.is_empty());
        assert!(result.cleanup_log.is_empty());
        assert!(h.namespaces.calls().iter().any(|c| c.starts_with("delete bench-create-pod-")));
    }

    #[tokio::test]
    async fn test_expectation_failure() {
        let h = harness(FakeAgent::replying("deployment created"), FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        let mut task = task_in(dir.path());
        task.expect = vec![Expectation::contains("pod/.*created"), Expectation::contains("service")];

        let result = h.runner.evaluate_task(&task, &LlmConfig::new("openai", "gpt-4o")).await;
        assert_eq!(result.result, TaskResult::Fail);
        assert_eq!(result.failures.len(), 2);
        assert!(result.error.is_empty());
    }

    #[tokio::test]
    async fn test_verifier_failure() {
        let h = harness(FakeAgent::replying("done"), FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("verify.sh"), "echo 'pod not running'\nexit 1\n").unwrap();
        let mut task = task_in(dir.path());
        task.verifier = Some("verify.sh".into());

        let result = h.runner.evaluate_task(&task, &LlmConfig::new("openai", "gpt-4o")).await;
        assert_eq!(result.result, TaskResult::Fail);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].failure_type, "verifier");
        assert!(result.failures[0].message.starts_with("verifier failed: "));
        assert_eq!(result.failures[0].actual, "pod not running\n");
    }

    #[tokio::test]
    async fn test_agent_timeout_keeps_partial_output() {
        let agent = FakeAgent {
            reply: "partial".into(),
            stall: Some(Duration::from_secs(30)),
            ..FakeAgent::default()
        };
        let h = harness(agent, FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cleanup.sh"), "echo cleaned\n").unwrap();
        let mut task = task_in(dir.path());
        task.timeout = "200ms".into();
        task.cleanup = Some("cleanup.sh".into());

        let result = h.runner.evaluate_task(&task, &LlmConfig::new("openai", "gpt-4o")).await;
        assert_eq!(result.result, TaskResult::Timeout);
        assert_eq!(result.error, "task timed out");
        assert_eq!(result.output, "partial");
        assert!(result.cleanup_log.is_empty());
        assert!(result.duration < Duration::from_secs(10));
        assert_eq!(h.namespaces.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_aborts_agent() {
        let agent = FakeAgent {
            stall: Some(Duration::from_secs(30)),
            ..FakeAgent::default()
        };
        let h = harness(agent, FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        let task = task_in(dir.path());

        let handle = h.runner.cancel_handle();
        assert!(!handle.is_cancelled());
        handle.cancel();
        let result = h.runner.evaluate_task(&task, &LlmConfig::new("openai", "gpt-4o")).await;
        assert_eq!(result.result, TaskResult::Error);
        assert_eq!(result.error, "run cancelled");
    }

    #[tokio::test]
    async fn test_namespace_create_failure() {
        let namespaces = FakeNamespaces {
            fail_create: true,
            ..FakeNamespaces::default()
        };
        let h = harness(FakeAgent::replying("x"), namespaces, |c| c);
        let dir = TempDir::new().unwrap();
        let result = h
            .runner
            .evaluate_task(&task_in(dir.path()), &LlmConfig::new("openai", "gpt-4o"))
            .await;
        assert_eq!(result.result, TaskResult::Error);
        let namespace = format!("bench-create-pod-{}", h.runner.run_id());
        assert_eq!(
            result.error,
            format!("failed to create namespace: namespace {}: forbidden", namespace)
        );
        assert_eq!(h.namespaces.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_error() {
        let agent = FakeAgent {
            reply: "half".into(),
            fail_first: 1,
            ..FakeAgent::default()
        };
        let h = harness(agent, FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        let result = h
            .runner
            .evaluate_task(&task_in(dir.path()), &LlmConfig::new("openai", "gpt-4o"))
            .await;
        assert_eq!(result.result, TaskResult::Error);
        assert_eq!(result.error, "agent failed: configuration error: model unavailable");
        assert_eq!(result.output, "half");
    }

    #[tokio::test]
    async fn test_run_cross_product_and_persistence() {
        let h = harness(FakeAgent::replying("pod/nginx created"), FakeNamespaces::default(), |c| {
            c.with_llm(LlmConfig::new("ollama", "qwen2.5"))
                .with_parallelism(2)
        });
        let mut config = (*h.runner.pipeline.config).clone();
        config.save_log = true;
        let tasks_dir = config.task_dir.clone();
        write_task(&tasks_dir, "create-pod", "script:\n  - prompt: create a pod\nexpect:\n  - contains: created\n");
        write_task(&tasks_dir, "scale-deploy", "difficulty: hard\nscript:\n  - prompt: scale\nexpect:\n  - contains: scaled\n");

        let runner = Runner::new(config.clone())
            .unwrap()
            .with_cluster_provider(FakeCluster::existing())
            .with_namespace_manager(h.namespaces.clone())
            .with_agent(Arc::new(FakeAgent::replying("pod/nginx created")));
        let summary = runner.run().await.unwrap();

        assert_eq!(summary.run_id, runner.run_id());
        assert_eq!(summary.total_tasks, 4);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.fail_count, 2);
        assert_eq!(summary.difficulty_counts(crate::task::Difficulty::Hard), (0, 2));
        assert_eq!(summary.llm_results.len(), 2);
        assert_eq!(summary.pass_at_1, 50.0);
        assert_eq!(runner.results().await.len(), 4);

        let saved = crate::report::load_results(&config.output_dir).unwrap();
        assert_eq!(saved.len(), 4);
        assert!(saved.iter().all(|r| !r.log_path.is_empty()));
        let log = std::fs::read_to_string(&saved[0].log_path).unwrap();
        assert!(log.starts_with("Task: "));
        assert!(config.output_dir.join("create-pod").is_dir());
    }

    #[tokio::test]
    async fn test_oversized_timeout_falls_back_to_default() {
        let h = harness(FakeAgent::replying("pod/nginx created"), FakeNamespaces::default(), |c| c);
        let dir = TempDir::new().unwrap();
        let mut task = task_in(dir.path());
        task.timeout = "300000000000y".into();

        let (timeout, _) = h.runner.pipeline.deadline_for(&task);
        assert_eq!(timeout, h.runner.config().default_timeout());

        let result = h.runner.evaluate_task(&task, &LlmConfig::new("openai", "gpt-4o")).await;
        assert_eq!(result.result, TaskResult::Success, "error: {}", result.error);
    }

    #[tokio::test]
    async fn test_run_reports_every_pairing_even_when_a_worker_panics() {
        let agent = FakeAgent {
            panics: true,
            ..FakeAgent::default()
        };
        let h = harness(agent, FakeNamespaces::default(), |c| c);
        write_task(&h.runner.config().task_dir, "huge-timeout", "timeout: 300000000000y\nscript:\n  - prompt: go\n");

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.total_tasks, 1);
        assert_eq!(summary.error_count, 1);
        let results = h.runner.results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].task_id, "huge-timeout");
        assert!(results[0].error.starts_with("evaluation aborted: "), "error: {}", results[0].error);
    }

    #[tokio::test]
    async fn test_run_without_tasks() {
        let h = harness(FakeAgent::default(), FakeNamespaces::default(), |c| c);
        let err = h.runner.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::NoTasks));
    }

    #[tokio::test]
    async fn test_retries_on_error() {
        let agent = FakeAgent {
            reply: "ok".into(),
            fail_first: 1,
            ..FakeAgent::default()
        };
        let h = harness(agent, FakeNamespaces::default(), |c| c.with_retries(2));
        let dir = TempDir::new().unwrap();
        let result = h
            .runner
            .pipeline
            .evaluate_with_retries(&task_in(dir.path()), &LlmConfig::new("openai", "gpt-4o"))
            .await;
        assert_eq!(result.result, TaskResult::Success);
        assert_eq!(result.attempt, 2);
    }

    #[test]
    fn test_build_log_content() {
        let dir = TempDir::new().unwrap();
        let task = task_in(dir.path());
        let mut result = EvalResult::new(&task, &LlmConfig::new("openai", "gpt-4o"), "r", 1);
        result.setup_log = "setting up".into();
        result.output = "agent says hi".into();
        result.failures = vec![
            Failure::new("contains", "output does not match pattern: x"),
            Failure::new("verifier", "verifier failed: exit status: 1"),
        ];
        result.finish(TaskResult::Fail);

        let log = build_log_content(&result);
        assert!(log.starts_with("Task: create-pod\nLLM: openai-gpt-4o (gpt-4o)\nResult: fail\n"));
        assert!(log.contains("\n--- Setup Log ---\nsetting up\n--- Agent Output ---\nagent says hi\n--- Verify Log ---\n"));
        assert!(!log.contains("--- Error ---"));
        assert!(log.ends_with(
            "\n--- Failures ---\n1. contains: output does not match pattern: x\n2. verifier: verifier failed: exit status: 1\n"
        ));
    }

    #[test]
    fn test_progress_line() {
        let dir = TempDir::new().unwrap();
        let mut result = EvalResult::new(&task_in(dir.path()), &LlmConfig::new("openai", "gpt-4o"), "r", 1);
        result.finish(TaskResult::Success);
        assert_eq!(progress_line(&result), "[✓] create-pod (openai-gpt-4o) - success");
        result.finish(TaskResult::Timeout);
        assert_eq!(progress_line(&result), "[✗] create-pod (openai-gpt-4o) - timeout");
    }

    #[test]
    fn test_report_path() {
        assert_eq!(report_path(Path::new(".build"), "md"), PathBuf::from(".build/report.md"));
    }
}
