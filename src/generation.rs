use crate::config::ExperimentConfig;
use crate::models::{ChatMessage, PromptConfig};
use crate::providers::ChatGenerator;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Environment variable {0} not found")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid chat request: {0}")]
    InvalidRequest(String),

    #[error("Chat completion failed: {0}")]
    Api(#[from] OpenAIError),
}

/// Chat completion client for Mistral's OpenAI-compatible endpoint
pub struct MistralClient {
    client: Client<OpenAIConfig>,
    max_tokens: Option<u32>,
    rate_limit_rps: f64,
    /// Time of the last request, for client-side rate limiting
    last_request: Mutex<Option<Instant>>,
}

impl MistralClient {
    /// Create a client using the API key named by `env_var_api_key`
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.env_var_api_key)
            .map_err(|_| GenerationError::MissingApiKey(config.env_var_api_key.clone()))?;

        Self::new(api_key, config)
    }

    pub fn new(api_key: String, config: &ExperimentConfig) -> Result<Self, GenerationError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            max_tokens: config.max_tokens,
            rate_limit_rps: config.rate_limit_rps,
            last_request: Mutex::new(None),
        })
    }

    /// Enforce rate limiting for API requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps <= 0.0 {
            return;
        }

        let min_interval = Duration::from_secs_f64(1.0 / rate_limit_rps);

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                let sleep_duration = min_interval - elapsed;
                sleep(sleep_duration).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Build the chat completion request
    fn build_request(
        &self,
        messages: &[ChatMessage],
        config: &PromptConfig,
    ) -> Result<CreateChatCompletionRequest, GenerationError> {
        let request_messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&config.model)
            .messages(request_messages)
            .temperature(config.temperature as f32);
        if let Some(max_tokens) = self.max_tokens {
            args.max_tokens(u16::try_from(max_tokens).unwrap_or(u16::MAX));
        }

        args.build()
            .map_err(|e| GenerationError::InvalidRequest(e.to_string()))
    }

    /// Extract the generated text, empty if the model returned none
    fn extract_content(response: CreateChatCompletionResponse) -> String {
        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "chat completion usage"
            );
        }

        match response.choices.into_iter().next() {
            Some(choice) => choice.message.content.unwrap_or_default(),
            None => String::new(),
        }
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, GenerationError> {
    let content = message.content.clone();
    let built: Result<ChatCompletionRequestMessage, OpenAIError> = match message.role.as_str() {
        "system" => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map(Into::into),
        "user" => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map(Into::into),
        "assistant" => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map(Into::into),
        other => {
            return Err(GenerationError::InvalidRequest(format!(
                "unsupported message role: {}",
                other
            )));
        }
    };

    built.map_err(|e| GenerationError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl ChatGenerator for MistralClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: &PromptConfig,
    ) -> Result<String, GenerationError> {
        let request = self.build_request(messages, config)?;

        {
            let mut last_request = self.last_request.lock().await;
            Self::enforce_rate_limit(&mut *last_request, self.rate_limit_rps).await;
        }

        tracing::debug!(model = %config.model, temperature = config.temperature, "requesting chat completion");
        let response = self.client.chat().create(request).await?;

        Ok(Self::extract_content(response))
    }
}
