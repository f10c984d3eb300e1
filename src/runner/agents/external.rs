//! External agent adapter.
//!
//! Runs an agent binary with the cluster coordinates on its command line,
//! writes the task prompts to its stdin one per line and streams its stdout
//! back as the agent output.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

use super::{AgentAdapter, AgentError, AgentOutput, AgentRequest};
use crate::runner::config::{LlmConfig, RunConfig};

/// Adapter for any CLI agent that reads prompts from stdin.
#[derive(Debug, Clone)]
pub struct ExternalAgent {
    bin: PathBuf,
    args: Vec<String>,
    enable_tool_use_shim: bool,
    max_turns: u32,
    max_tokens: u32,
}

impl ExternalAgent {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
            enable_tool_use_shim: false,
            max_turns: 0,
            max_tokens: 0,
        }
    }

    pub fn from_config(bin: PathBuf, config: &RunConfig) -> Self {
        Self {
            bin,
            args: config.agent_args.clone(),
            enable_tool_use_shim: config.enable_tool_use_shim,
            max_turns: config.agent_max_turns,
            max_tokens: config.agent_max_tokens,
        }
    }

    /// Leading arguments, placed before the generated flags.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Full argument list for one invocation.
    fn command_args(&self, llm: &LlmConfig, kubeconfig: &str, namespace: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--kubeconfig".to_string(),
            kubeconfig.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ]);

        if self.enable_tool_use_shim {
            args.push("--enable-tool-use-shim".to_string());
        }
        if self.max_turns > 0 {
            args.extend(["--max-turns".to_string(), self.max_turns.to_string()]);
        }
        if self.max_tokens > 0 {
            args.extend(["--max-tokens".to_string(), self.max_tokens.to_string()]);
        }
        if !llm.provider.is_empty() {
            args.extend(["--provider".to_string(), llm.provider.clone()]);
        }
        if !llm.model.is_empty() {
            args.extend(["--model".to_string(), llm.model.clone()]);
        }
        if let Some(endpoint) = llm.endpoint.as_deref().filter(|e| !e.is_empty()) {
            args.extend(["--endpoint".to_string(), endpoint.to_string()]);
        }
        args
    }
}

#[async_trait]
impl AgentAdapter for ExternalAgent {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn run(
        &self,
        request: AgentRequest<'_>,
        output: &mut AgentOutput,
    ) -> Result<(), AgentError> {
        let args = self.command_args(request.llm, request.kubeconfig, request.namespace);

        let mut cmd = Command::new(&self.bin);
        cmd.args(&args)
            .env("KUBECONFIG", request.kubeconfig)
            .env("NAMESPACE", request.namespace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = request.llm.api_key.as_deref().filter(|k| !k.is_empty()) {
            cmd.env("LLM_API_KEY", key);
        }

        info!(
            agent = %self.bin.display(),
            task_id = %request.task.id,
            namespace = %request.namespace,
            "Starting external agent"
        );

        let mut child = cmd.spawn().map_err(|source| AgentError::Spawn {
            bin: self.bin.display().to_string(),
            source,
        })?;

        let mut prompts = String::new();
        for prompt in &request.task.script {
            prompts.push_str(&prompt.text);
            prompts.push('\n');
        }
        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // The agent may exit without reading; a broken pipe is not an error.
                let _ = stdin.write_all(prompts.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        });

        let stderr = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        });

        if let Some(mut stdout) = child.stdout.take() {
            let mut chunk = [0u8; 8192];
            loop {
                let n = stdout.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                output.push_bytes(&chunk[..n]);
            }
        }

        let status = child.wait().await?;
        let _ = writer.await;
        let stderr = stderr_reader.await.unwrap_or_default();

        debug!(status = %status, bytes = output.text().len(), "External agent finished");

        if !status.success() {
            return Err(AgentError::Exited {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        Ok(())
    }
}
