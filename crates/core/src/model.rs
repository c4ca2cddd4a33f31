use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::history::{Role, Turn};
use crate::schema::{self, SchemaDescriptor, StructuredOutput};

/// One fully assembled model call: system context, a window of prior
/// turns, and the current user payload.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub history: Vec<Turn>,
    pub user: String,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            history: Vec::new(),
            user: user.into(),
        }
    }

    pub fn with_history(mut self, history: &[Turn]) -> Self {
        self.history = history.to_vec();
        self
    }
}

/// How a raw model call failed. Transport failures are the only kind the
/// invoker will retry.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("provider rejected the call: {0}")]
    Provider(String),
}

/// A raw completion client. Implementations return the model's text
/// verbatim; parsing and validation live in [`ModelInvoker`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError>;
}

/// [`ModelClient`] for any OpenAI-compatible chat completion API.
pub struct OpenAiModelClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiModelClient {
    /// `config` carries the API key and base URL, `model` the completion
    /// model identifier (e.g. "gpt-4o").
    pub fn new(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    fn build_messages(
        request: &ModelRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.as_str())
                .build()?
                .into(),
        ];
        for turn in &request.history {
            match turn.role {
                Role::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?
                        .into(),
                ),
                Role::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.as_str())
                        .build()?
                        .into(),
                ),
            }
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.as_str())
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl ModelClient for OpenAiModelClient {
    async fn complete(&self, request: ModelRequest) -> Result<String, ModelError> {
        let messages =
            Self::build_messages(&request).map_err(|e| ModelError::Provider(e.to_string()))?;
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| match e {
                OpenAIError::Reqwest(inner) => ModelError::Transport(inner.to_string()),
                other => ModelError::Provider(other.to_string()),
            })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        Ok(content)
    }
}

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// The one component that talks to the LLM provider. Bounds every call
/// with a timeout, retries transient transport failures a fixed number of
/// times, and validates the response against the caller's schema before
/// anything downstream may act on it.
///
/// Schema-invalid output is never retried: the model answered, it just
/// answered badly, and re-asking risks duplicate side effects upstream.
pub struct ModelInvoker {
    client: Arc<dyn ModelClient>,
    timeout: Duration,
    max_retries: u32,
}

impl ModelInvoker {
    pub fn new(client: Arc<dyn ModelClient>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client,
            timeout,
            max_retries,
        }
    }

    pub async fn invoke(
        &self,
        request: ModelRequest,
        schema: &SchemaDescriptor,
    ) -> Result<StructuredOutput, EngineError> {
        let mut attempt: u32 = 0;
        let raw = loop {
            let call = self.client.complete(request.clone());
            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(text)) => break text,
                Ok(Err(ModelError::Transport(reason))) => {
                    if attempt < self.max_retries {
                        attempt += 1;
                        warn!(attempt, %reason, schema = schema.name, "transient model error, retrying");
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    } else {
                        return Err(EngineError::ModelUnavailable(reason));
                    }
                }
                Ok(Err(ModelError::Provider(reason))) => {
                    return Err(EngineError::ModelUnavailable(reason));
                }
                Err(_elapsed) => {
                    if attempt < self.max_retries {
                        attempt += 1;
                        warn!(attempt, schema = schema.name, "model call timed out, retrying");
                    } else {
                        return Err(EngineError::ModelUnavailable(format!(
                            "timed out after {}s",
                            self.timeout.as_secs()
                        )));
                    }
                }
            }
        };

        debug!(schema = schema.name, bytes = raw.len(), "model response received");
        let value = schema::extract_json(&raw)?;
        Ok(schema.validate(&value)?)
    }
}
