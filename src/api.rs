//! # API Module
//!
//! Everything that talks to a language-model backend.
//!
//! Model execution is a capability lookup: [`Endpoint::for_model`] maps a
//! model's runtime to one of two endpoint variants, an OpenAI-compatible
//! hosted API (OpenAI, Anthropic, Google, and xAI all speak this dialect) or
//! a local Ollama daemon, validating the credential precondition as it does
//! so. All request traffic goes through `async-openai` against whichever base
//! URL the variant carries.
//!
//! The [`ModelBackend`] trait is the seam the session loop depends on: given
//! a model and the ordered message list it yields the completed text or a
//! failure. The production implementation, [`LlmBackend`], streams tokens to
//! the terminal as they arrive, with a spinner while the first token is
//! outstanding. `complete_quiet` is the non-interactive path used for
//! auxiliary calls such as title generation.

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageUrl,
    },
};
use base64::Engine;
use crossterm::{
    ExecutableCommand,
    style::{Color, SetForegroundColor},
};
use futures::StreamExt;
use indicatif::ProgressBar;
use std::io::{Write, stdout};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::chat_store::Message;
use crate::config::MemchatConfig;
use crate::models::{ModelInfo, Runtime};

/// Errors from backend selection or the completion call itself.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The model's runtime needs an API key that is not configured.
    #[error("{provider} API key not set. Add it to config.yaml or export {env_var}")]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("request failed: {0}")]
    Api(String),

    #[error("could not read attachment {path}: {source}")]
    Attachment {
        path: String,
        source: std::io::Error,
    },
}

impl From<OpenAIError> for BackendError {
    fn from(err: OpenAIError) -> Self {
        BackendError::Api(err.to_string())
    }
}

/// Where a completion request goes. The closed set of backend variants;
/// everything downstream dispatches on this by pattern match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A hosted OpenAI-compatible API.
    OpenAiCompatible { api_base: String, api_key: String },
    /// A local runtime (Ollama) exposing the same wire dialect, no key.
    LocalRuntime { api_base: String },
}

impl Endpoint {
    /// Capability lookup: resolve the endpoint for `model`, checking that the
    /// required credential is present. No network traffic happens here, so
    /// this doubles as the validation step for the switch-model command.
    pub fn for_model(model: &ModelInfo, config: &MemchatConfig) -> Result<Self, BackendError> {
        let hosted = |provider, env_var, api_base: &str| {
            config
                .key_for(model.runtime)
                .map(|key| Endpoint::OpenAiCompatible {
                    api_base: api_base.to_string(),
                    api_key: key.to_string(),
                })
                .ok_or(BackendError::MissingCredential { provider, env_var })
        };

        match model.runtime {
            Runtime::OpenAi => hosted("OpenAI", "OPENAI_API_KEY", "https://api.openai.com/v1"),
            Runtime::Anthropic => {
                hosted("Anthropic", "ANTHROPIC_API_KEY", "https://api.anthropic.com/v1")
            }
            Runtime::Google => hosted(
                "Google",
                "GOOGLE_API_KEY",
                "https://generativelanguage.googleapis.com/v1beta/openai",
            ),
            Runtime::XAi => hosted("xAI", "XAI_API_KEY", "https://api.x.ai/v1"),
            Runtime::Ollama => Ok(Endpoint::LocalRuntime {
                api_base: config.ollama_base_url.clone(),
            }),
        }
    }

    fn client(&self) -> Client<OpenAIConfig> {
        let config = match self {
            Endpoint::OpenAiCompatible { api_base, api_key } => OpenAIConfig::new()
                .with_api_base(api_base.clone())
                .with_api_key(api_key.clone()),
            // Ollama ignores the key but the client wants one
            Endpoint::LocalRuntime { api_base } => OpenAIConfig::new()
                .with_api_base(api_base.clone())
                .with_api_key("ollama"),
        };
        Client::with_config(config)
    }
}

/// The Model Backend capability the session loop is written against.
///
/// Implementations must preserve message order and represent roles, attached
/// context, and image attachments faithfully.
pub trait ModelBackend {
    /// Complete the conversation, rendering output interactively where the
    /// implementation supports it.
    fn complete(
        &self,
        model: &ModelInfo,
        messages: &[Message],
    ) -> impl Future<Output = Result<String, BackendError>>;

    /// Complete without any terminal output, for auxiliary calls.
    fn complete_quiet(
        &self,
        model: &ModelInfo,
        messages: &[Message],
    ) -> impl Future<Output = Result<String, BackendError>>;
}

/// Production backend driving real endpoints over `async-openai`.
pub struct LlmBackend {
    config: MemchatConfig,
}

impl LlmBackend {
    pub fn new(config: MemchatConfig) -> Self {
        Self { config }
    }
}

impl ModelBackend for LlmBackend {
    async fn complete(&self, model: &ModelInfo, messages: &[Message]) -> Result<String, BackendError> {
        let endpoint = Endpoint::for_model(model, &self.config)?;
        let request_messages = build_request_messages(messages)?;
        stream_completion(&endpoint, model.full_name, request_messages).await
    }

    async fn complete_quiet(
        &self,
        model: &ModelInfo,
        messages: &[Message],
    ) -> Result<String, BackendError> {
        let endpoint = Endpoint::for_model(model, &self.config)?;
        let request_messages = build_request_messages(messages)?;
        fetch_completion(&endpoint, model.full_name, request_messages).await
    }
}

/// Map the conversation into wire messages.
///
/// User messages inline their retrieved context ahead of the text; an image
/// attachment turns the content into a text + data-URL part list. Assistant
/// messages are plain text. The match is exhaustive on purpose: a new
/// message variant must be handled here before it can ship.
#[allow(deprecated)]
fn build_request_messages(
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
    let mut request_messages = Vec::with_capacity(messages.len());

    for message in messages {
        let request_message = match message {
            Message::User {
                content,
                context,
                image,
            } => {
                let text = match context.as_deref().filter(|c| !c.is_empty()) {
                    Some(context) => format!("(Relevant context: {context})\n\n{content}"),
                    None => content.clone(),
                };

                let user_content = match image {
                    Some(path) => {
                        let bytes =
                            std::fs::read(path).map_err(|source| BackendError::Attachment {
                                path: path.display().to_string(),
                                source,
                            })?;
                        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                        ChatCompletionRequestUserMessageContent::Array(vec![
                            ChatCompletionRequestUserMessageContentPart::Text(
                                ChatCompletionRequestMessageContentPartText { text },
                            ),
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImage {
                                    image_url: ImageUrl {
                                        url: format!("data:image/jpeg;base64,{encoded}"),
                                        detail: None,
                                    },
                                },
                            ),
                        ])
                    }
                    None => ChatCompletionRequestUserMessageContent::Text(text),
                };

                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: user_content,
                    name: None,
                })
            }
            Message::Assistant { content } => {
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                        content.clone(),
                    )),
                    name: None,
                    refusal: None,
                    audio: None,
                    tool_calls: None,
                    function_call: None,
                })
            }
        };
        request_messages.push(request_message);
    }

    Ok(request_messages)
}

/// Stream the completion, echoing tokens to the terminal as they arrive.
///
/// A steady-tick spinner runs until the first token; its ticker thread is
/// stopped before this function returns, so nothing outlives the call.
async fn stream_completion(
    endpoint: &Endpoint,
    model_name: &str,
    request_messages: Vec<ChatCompletionRequestMessage>,
) -> Result<String, BackendError> {
    let client = endpoint.client();
    let request = CreateChatCompletionRequestArgs::default()
        .model(model_name)
        .messages(request_messages)
        .build()?;

    debug!(model = model_name, "sending streaming completion request");

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("thinking");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut stream = match client.chat().create_stream(request).await {
        Ok(stream) => stream,
        Err(err) => {
            spinner.finish_and_clear();
            return Err(err.into());
        }
    };

    let mut stdout = stdout();
    let mut response = String::new();

    while let Some(result) = stream.next().await {
        match result {
            Ok(chunk) => {
                for choice in &chunk.choices {
                    if let Some(content) = &choice.delta.content {
                        if response.is_empty() {
                            spinner.finish_and_clear();
                            let _ = stdout.execute(SetForegroundColor(Color::Blue));
                        }
                        response.push_str(content);
                        let _ = write!(stdout, "{content}");
                        let _ = stdout.flush();
                    }
                }
            }
            Err(err) => {
                spinner.finish_and_clear();
                let _ = stdout.execute(SetForegroundColor(Color::Reset));
                return Err(err.into());
            }
        }
    }

    spinner.finish_and_clear();
    let _ = stdout.execute(SetForegroundColor(Color::Reset));
    if !response.is_empty() {
        let _ = writeln!(stdout);
    }

    Ok(response)
}

/// One-shot completion with no terminal output.
async fn fetch_completion(
    endpoint: &Endpoint,
    model_name: &str,
    request_messages: Vec<ChatCompletionRequestMessage>,
) -> Result<String, BackendError> {
    let client = endpoint.client();
    let request = CreateChatCompletionRequestArgs::default()
        .model(model_name)
        .messages(request_messages)
        .build()?;

    debug!(model = model_name, "sending completion request");

    let response = client.chat().create(request).await?;

    let mut text = String::new();
    for choice in response.choices {
        if let Some(content) = choice.message.content {
            text.push_str(&content);
        }
    }
    Ok(text)
}

/// Instruction used for title generation.
pub const TITLE_PROMPT: &str = "Generate a concise, specific 2-5 word title for this conversation. \
     Respond with ONLY the title, no quotes or explanations.";

/// Ask the backend to title a conversation's first exchange.
///
/// Returns whatever the model said, trimmed; the caller applies its own
/// sanity check before accepting the result.
pub async fn generate_title<B: ModelBackend>(
    backend: &B,
    model: &ModelInfo,
    exchange: &[Message],
) -> Result<String, BackendError> {
    let mut prompt = String::from(TITLE_PROMPT);
    prompt.push_str("\n\n");
    for message in exchange.iter().take(2) {
        prompt.push_str(message.role());
        prompt.push_str(": ");
        prompt.push_str(message.content());
        prompt.push('\n');
    }

    let title = backend.complete_quiet(model, &[Message::user(prompt)]).await?;
    Ok(title.trim().to_string())
}
