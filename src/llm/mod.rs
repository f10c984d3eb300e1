//! LLM integration for the built-in agent.
//!
//! ```ignore
//! use kube_agent_bench::llm::{ChatClient, GenerationRequest, LlmProvider, Message};
//!
//! let client = ChatClient::for_provider("openai", None, Some(api_key))?;
//! let request = GenerationRequest::new(
//!     "gpt-4o",
//!     vec![Message::system("You are a Kubernetes assistant."), Message::user("List pods")],
//! );
//! let response = client.generate(request).await?;
//! ```

pub mod client;

pub use client::{
    default_endpoint, ChatClient, Choice, FunctionCall, FunctionDefinition, GenerationRequest,
    GenerationResponse, LlmProvider, Message, ToolCall, ToolDefinition, Usage,
};
