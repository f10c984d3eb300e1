//! Built-in agent backed by an OpenAI-compatible chat endpoint.
//!
//! Without tool use the model gets one completion for the whole task. With
//! tool use it may call `kubectl` and `bash` for up to `max_turns` rounds;
//! every call is offered to the approval callback first and runs with the
//! task's `KUBECONFIG` and `NAMESPACE`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AgentAdapter, AgentError, AgentOutput, AgentRequest};
use crate::llm::{ChatClient, GenerationRequest, LlmProvider, Message, ToolCall, ToolDefinition};
use crate::runner::config::{LlmConfig, RunConfig, DEFAULT_AGENT_MAX_TURNS};
use crate::runner::result::TraceStep;
use crate::utils::truncate;

/// Returned to the model for a call the approval callback declined.
pub const TOOL_CANCELLED: &str = "Tool execution cancelled by user";

/// Tool output beyond this many characters is cut before it goes back to
/// the model.
const MAX_TOOL_OUTPUT_CHARS: usize = 16_000;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a Kubernetes expert assistant with DIRECT ACCESS to kubectl and bash tools.
ALWAYS USE TOOLS to execute commands - NEVER just suggest commands.
When asked about Kubernetes resources, IMMEDIATELY use the kubectl tool.";

/// Decides whether a tool call may run. Receives the tool name and its raw
/// JSON arguments.
pub type ApprovalCallback = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[derive(Debug, Deserialize)]
struct CommandArgs {
    #[serde(default)]
    command: String,
}

/// In-process agent.
pub struct BuiltinAgent {
    system_prompt: Option<String>,
    max_turns: u32,
    max_tokens: u32,
    provider: Option<Arc<dyn LlmProvider>>,
    approval: Option<ApprovalCallback>,
}

impl BuiltinAgent {
    pub fn new() -> Self {
        Self {
            system_prompt: None,
            max_turns: DEFAULT_AGENT_MAX_TURNS,
            max_tokens: 0,
            provider: None,
            approval: None,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        let mut agent = Self::new();
        agent.system_prompt = config.agent_system_prompt.clone();
        if config.agent_max_turns > 0 {
            agent.max_turns = config.agent_max_turns;
        }
        agent.max_tokens = config.agent_max_tokens;
        agent
    }

    /// Uses `provider` for every model instead of building a client from
    /// each LLM config.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Overrides the approval decision, which otherwise follows the LLM
    /// config's `auto_approve`.
    pub fn with_approval(mut self, approval: ApprovalCallback) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    fn client_for(&self, llm: &LlmConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
        if let Some(provider) = &self.provider {
            return Ok(Arc::clone(provider));
        }
        let client = ChatClient::for_provider(&llm.provider, llm.endpoint.as_deref(), llm.api_key.clone())?;
        Ok(Arc::new(client))
    }

    fn approved(&self, llm: &LlmConfig, call: &ToolCall) -> bool {
        match &self.approval {
            Some(approve) => approve(&call.function.name, &call.function.arguments),
            None => llm.auto_approve,
        }
    }

    fn request(&self, llm: &LlmConfig, messages: Vec<Message>) -> GenerationRequest {
        let mut request = GenerationRequest::new(llm.model.clone(), messages);
        if let Some(temperature) = llm.temperature {
            request = request.with_temperature(temperature);
        }
        match llm.max_tokens {
            Some(max) => request = request.with_max_tokens(max),
            None if self.max_tokens > 0 => request = request.with_max_tokens(self.max_tokens),
            None => {}
        }
        request
    }
}

impl Default for BuiltinAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Prompt naming the cluster coordinates, followed by the task prompts.
pub fn task_prompt(request: &AgentRequest<'_>) -> String {
    format!(
        "You are a Kubernetes AI assistant. You have access to a Kubernetes cluster.\n\
         Kubeconfig: {}\n\
         Namespace: {}\n\
         \n\
         Complete the following task:\n{}",
        request.kubeconfig,
        request.namespace,
        request.task.task_script()
    )
}

/// The `kubectl` and `bash` tools offered to the model.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let params = |description: &str| {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": description}
            },
            "required": ["command"]
        })
    };
    vec![
        ToolDefinition::function(
            "kubectl",
            "Execute a kubectl command against the cluster",
            params("The full kubectl command, e.g. \"kubectl get pods\""),
        ),
        ToolDefinition::function(
            "bash",
            "Execute a shell command for non-kubectl operations",
            params("The shell command to run"),
        ),
    ]
}

/// Runs one approved tool call and returns what the model sees.
async fn execute_tool(name: &str, arguments: &str, kubeconfig: &str, namespace: &str) -> String {
    let command = match serde_json::from_str::<CommandArgs>(arguments) {
        Ok(args) if !args.command.trim().is_empty() => args.command,
        Ok(_) => return "Error: missing command argument".to_string(),
        Err(e) => return format!("Error: invalid arguments: {}", e),
    };

    let command = match name {
        "kubectl" if !command.trim_start().starts_with("kubectl") => format!("kubectl {}", command),
        "kubectl" | "bash" => command,
        other => return format!("Error: unknown tool: {}", other),
    };

    debug!(tool = %name, command = %command, "Executing tool call");

    let result = Command::new("bash")
        .arg("-c")
        .arg(&command)
        .env("KUBECONFIG", kubeconfig)
        .env("NAMESPACE", namespace)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match result {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                text.push_str(&format!("\nError: {}", output.status));
            }
            truncate(&text, MAX_TOOL_OUTPUT_CHARS)
        }
        Err(e) => format!("Error: failed to run command: {}", e),
    }
}

#[async_trait]
impl AgentAdapter for BuiltinAgent {
    fn name(&self) -> &'static str {
        "builtin"
    }

    async fn run(
        &self,
        request: AgentRequest<'_>,
        output: &mut AgentOutput,
    ) -> Result<(), AgentError> {
        let llm = request.llm;
        let client = self.client_for(llm)?;
        let prompt = task_prompt(&request);
        output.record(TraceStep::prompt(prompt.clone()));

        info!(
            task_id = %request.task.id,
            llm = %llm.id,
            tools = llm.enable_tool_use,
            "Starting built-in agent"
        );

        if !llm.enable_tool_use {
            let messages = vec![Message::user(prompt)];
            let response = client.generate(self.request(llm, messages)).await?;
            let text = response.first_content().unwrap_or_default().to_string();
            output.push_str(&text);
            output.record(TraceStep::response(text));
            return Ok(());
        }

        let system = self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut messages = vec![Message::system(system), Message::user(prompt)];
        let tools = tool_definitions();

        for turn in 0..self.max_turns {
            let response = client
                .generate(self.request(llm, messages.clone()).with_tools(tools.clone()))
                .await?;
            let Some(reply) = response.first_message().cloned() else {
                break;
            };

            let text = reply.text().to_string();
            if !text.is_empty() {
                output.push_str(&text);
                output.record(TraceStep::response(text));
            }

            if reply.tool_calls.is_empty() {
                debug!(turn = turn + 1, "Model finished without further tool calls");
                return Ok(());
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                let result = if self.approved(llm, &call) {
                    execute_tool(
                        &call.function.name,
                        &call.function.arguments,
                        request.kubeconfig,
                        request.namespace,
                    )
                    .await
                } else {
                    TOOL_CANCELLED.to_string()
                };
                output.record(TraceStep::tool_call(
                    call.function.name.clone(),
                    call.function.arguments.clone(),
                    result.clone(),
                ));
                messages.push(Message::tool(call.id, result));
            }
        }

        warn!(
            task_id = %request.task.id,
            max_turns = self.max_turns,
            "Built-in agent reached its turn limit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, FunctionCall, GenerationResponse};
    use crate::task::{Prompt, Task};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned assistant messages and records every request.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Message>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(LlmError::EmptyResponse)?;
            Ok(GenerationResponse {
                id: "r".into(),
                model: "m".into(),
                choices: vec![Choice {
                    index: 0,
                    message,
                    finish_reason: None,
                }],
                usage: None,
            })
        }
    }

    fn tool_reply(name: &str, command: &str) -> Message {
        Message {
            role: "assistant".into(),
            content: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{}", name),
                call_type: "function".into(),
                function: FunctionCall {
                    name: name.into(),
                    arguments: json!({ "command": command }).to_string(),
                },
            }],
            tool_call_id: None,
        }
    }

    fn task() -> Task {
        Task {
            id: "t".into(),
            script: vec![Prompt::text("Create an nginx pod"), Prompt::text("Expose it")],
            ..Task::default()
        }
    }

    fn request<'a>(task: &'a Task, llm: &'a LlmConfig) -> AgentRequest<'a> {
        AgentRequest {
            task,
            llm,
            kubeconfig: "/tmp/kc",
            namespace: "bench-t-1",
        }
    }

    #[test]
    fn test_task_prompt() {
        let task = task();
        let llm = LlmConfig::new("openai", "gpt-4o");
        assert_eq!(
            task_prompt(&request(&task, &llm)),
            "You are a Kubernetes AI assistant. You have access to a Kubernetes cluster.\n\
             Kubeconfig: /tmp/kc\nNamespace: bench-t-1\n\n\
             Complete the following task:\nCreate an nginx pod\nExpose it"
        );
    }

    #[tokio::test]
    async fn test_single_completion_without_tools() {
        let provider = ScriptedProvider::new(vec![Message::assistant("kubectl run nginx --image=nginx")]);
        let agent = BuiltinAgent::new().with_provider(provider.clone());
        let task = task();
        let llm = LlmConfig::new("openai", "gpt-4o");

        let mut output = AgentOutput::new();
        agent.run(request(&task, &llm), &mut output).await.unwrap();
        assert_eq!(output.text(), "kubectl run nginx --image=nginx");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert_eq!(output.trace().unwrap().total_steps, 2);
    }

    #[tokio::test]
    async fn test_tool_loop_executes_approved_calls() {
        let provider = ScriptedProvider::new(vec![
            tool_reply("bash", "echo \"ns=$NAMESPACE\""),
            Message::assistant("pod/nginx created"),
        ]);
        let agent = BuiltinAgent::new().with_provider(provider.clone());
        let task = task();
        let llm = LlmConfig::new("openai", "gpt-4o").with_tool_use(true, true);

        let mut output = AgentOutput::new();
        agent.run(request(&task, &llm), &mut output).await.unwrap();
        assert_eq!(output.text(), "pod/nginx created");

        let trace = output.trace().unwrap();
        assert_eq!(trace.tool_calls, 1);
        let call = trace.steps.iter().find(|s| s.is_tool_call()).unwrap();
        assert_eq!(call.tool_output, "ns=bench-t-1\n");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, "tool");
        assert_eq!(last.tool_call_id.as_deref(), Some("call_bash"));
    }

    #[tokio::test]
    async fn test_declined_calls_are_cancelled() {
        let provider = ScriptedProvider::new(vec![
            tool_reply("kubectl", "delete ns kube-system"),
            Message::assistant("ok"),
        ]);
        let agent = BuiltinAgent::new().with_provider(provider.clone());
        let task = task();
        let llm = LlmConfig::new("openai", "gpt-4o").with_tool_use(true, false);

        let mut output = AgentOutput::new();
        agent.run(request(&task, &llm), &mut output).await.unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].messages.last().unwrap().text(), TOOL_CANCELLED);
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let provider = ScriptedProvider::new(vec![
            tool_reply("bash", "true"),
            tool_reply("bash", "true"),
            tool_reply("bash", "true"),
        ]);
        let agent = BuiltinAgent::new()
            .with_provider(provider.clone())
            .with_approval(Arc::new(|_, _| true))
            .with_max_turns(2);
        let task = task();
        let llm = LlmConfig::new("openai", "gpt-4o").with_tool_use(true, false);

        let mut output = AgentOutput::new();
        agent.run(request(&task, &llm), &mut output).await.unwrap();
        assert_eq!(provider.requests.lock().unwrap().len(), 2);
        assert_eq!(output.trace().unwrap().tool_calls, 2);
    }

    #[tokio::test]
    async fn test_execute_tool_errors() {
        assert_eq!(
            execute_tool("bash", "{}", "kc", "ns").await,
            "Error: missing command argument"
        );
        assert!(execute_tool("helm", r#"{"command":"ls"}"#, "kc", "ns")
            .await
            .starts_with("Error: unknown tool"));
        let out = execute_tool("bash", r#"{"command":"echo oops; exit 4"}"#, "kc", "ns").await;
        assert!(out.starts_with("oops\n\nError: "));
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = BuiltinAgent::new().with_provider(provider);
        let task = task();
        let llm = LlmConfig::new("openai", "gpt-4o");
        let mut output = AgentOutput::new();
        let err = agent.run(request(&task, &llm), &mut output).await.unwrap_err();
        assert!(err.to_string().starts_with("AI request failed: "));
    }
}
