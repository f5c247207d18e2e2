use crate::config::ExperimentConfig;
use crate::models::{ChatMessage, DEFAULT_MODEL, DEFAULT_TEMPERATURE, DatasetItem, PromptConfig, ResolvedPrompt};
use crate::providers::{DatasetSource, ItemSpan, PromptSource, ScoreSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

const DATASET_ITEMS_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct LangfuseConfig {
    pub host: String,
    pub public_key: String,
    pub secret_key: String,
    pub timeout_secs: u64,
}

impl LangfuseConfig {
    /// Read the key pair from the environment variables named in `config`
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, LangfuseError> {
        let public_key = std::env::var(&config.langfuse_public_key_env)
            .map_err(|_| LangfuseError::MissingCredentials(config.langfuse_public_key_env.clone()))?;
        let secret_key = std::env::var(&config.langfuse_secret_key_env)
            .map_err(|_| LangfuseError::MissingCredentials(config.langfuse_secret_key_env.clone()))?;

        Ok(Self {
            host: config.resolved_langfuse_host(),
            public_key,
            secret_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LangfuseError {
    #[error("Environment variable {0} not found")]
    MissingCredentials(String),

    #[error("invalid Langfuse host: {0}")]
    InvalidHost(String),

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("prompt {name}@{label} is a {kind} prompt, expected chat")]
    NotChatPrompt {
        name: String,
        label: String,
        kind: String,
    },
}

/// Client for the Langfuse public API.
///
/// Trace, generation and score events are buffered and only sent by `flush`.
pub struct LangfuseClient {
    client: Client,
    config: LangfuseConfig,
    events: Mutex<Vec<IngestionEvent>>,
    run_links: Mutex<Vec<DatasetRunLink>>,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    name: String,
    #[serde(default)]
    version: Option<u32>,
    #[serde(rename = "type")]
    kind: String,
    prompt: Value,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PromptMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatePromptRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    prompt: &'a [ChatMessage],
    config: &'a PromptConfig,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetResponse {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetItemRecord {
    id: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    expected_output: Value,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DatasetItemsPage {
    data: Vec<DatasetItemRecord>,
    meta: PageMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateDatasetItemRequest<'a> {
    dataset_name: &'a str,
    input: &'a HashMap<String, String>,
    expected_output: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
struct IngestionEvent {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: &'static str,
    body: Value,
}

impl IngestionEvent {
    fn new(kind: &'static str, body: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionFailure>,
}

#[derive(Debug, Deserialize)]
struct IngestionFailure {
    id: String,
    status: u16,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetRunLink {
    run_name: String,
    dataset_item_id: String,
    trace_id: String,
}

impl LangfuseClient {
    pub fn new(config: LangfuseConfig) -> Result<Self, LangfuseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            events: Mutex::new(Vec::new()),
            run_links: Mutex::new(Vec::new()),
        })
    }

    /// Public API endpoint under the host, each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url, LangfuseError> {
        let invalid = || LangfuseError::InvalidHost(self.config.host.clone());
        let mut url = Url::parse(&self.config.host).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["api", "public"])
            .extend(segments);
        Ok(url)
    }

    /// Authenticate, send and decode the JSON body of a successful response
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, LangfuseError> {
        let response = request
            .basic_auth(&self.config.public_key, Some(&self.config.secret_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LangfuseError::Http { status, body });
        }

        Ok(response.json().await?)
    }

    /// Fetch the chat prompt version carrying `label`
    pub async fn fetch_prompt(&self, name: &str, label: &str) -> Result<ResolvedPrompt, LangfuseError> {
        let request = self
            .client
            .get(self.url(&["v2", "prompts", name])?)
            .query(&[("label", label)]);
        let response: PromptResponse = self.send(request).await?;

        if response.kind != "chat" {
            return Err(LangfuseError::NotChatPrompt {
                name: name.to_string(),
                label: label.to_string(),
                kind: response.kind,
            });
        }

        let messages = parse_chat_messages(response.prompt);
        let config = resolve_prompt_config(response.config.as_ref());

        Ok(ResolvedPrompt {
            name: response.name,
            label: label.to_string(),
            version: response.version,
            messages,
            config,
        })
    }

    /// Fetch every active item of a dataset, following pagination
    pub async fn fetch_dataset(&self, name: &str) -> Result<Vec<DatasetItem>, LangfuseError> {
        let dataset: DatasetResponse = self
            .send(self.client.get(self.url(&["v2", "datasets", name])?))
            .await?;
        tracing::debug!(dataset = %dataset.name, id = %dataset.id, "resolved dataset");

        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let request = self.client.get(self.url(&["dataset-items"])?).query(&[
                ("datasetName", name.to_string()),
                ("page", page.to_string()),
                ("limit", DATASET_ITEMS_PAGE_SIZE.to_string()),
            ]);
            let response: DatasetItemsPage = self.send(request).await?;

            items.extend(
                response
                    .data
                    .into_iter()
                    .filter(|record| record.status.as_deref() != Some("ARCHIVED"))
                    .map(into_dataset_item),
            );

            if response.meta.page >= response.meta.total_pages {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    /// Create a new chat prompt version with the given label
    pub async fn create_prompt(
        &self,
        name: &str,
        messages: &[ChatMessage],
        config: &PromptConfig,
        label: &str,
    ) -> Result<(), LangfuseError> {
        let body = CreatePromptRequest {
            kind: "chat",
            name,
            prompt: messages,
            config,
            labels: vec![label.to_string()],
        };
        let _: Value = self
            .send(self.client.post(self.url(&["v2", "prompts"])?).json(&body))
            .await?;
        Ok(())
    }

    pub async fn create_dataset(&self, name: &str, description: &str) -> Result<(), LangfuseError> {
        let body = json!({ "name": name, "description": description });
        let _: Value = self
            .send(self.client.post(self.url(&["v2", "datasets"])?).json(&body))
            .await?;
        Ok(())
    }

    pub async fn create_dataset_item(
        &self,
        dataset_name: &str,
        item: &DatasetItem,
    ) -> Result<(), LangfuseError> {
        let body = CreateDatasetItemRequest {
            dataset_name,
            input: &item.input,
            expected_output: item.expected_output.as_deref(),
        };
        let _: Value = self
            .send(self.client.post(self.url(&["dataset-items"])?).json(&body))
            .await?;
        Ok(())
    }

    fn enqueue(&self, event: IngestionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Send buffered events, then link traces to their dataset runs
    pub async fn flush_events(&self) -> Result<(), LangfuseError> {
        let events = std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner));
        if !events.is_empty() {
            let count = events.len();
            let body = json!({ "batch": events });
            let response: IngestionResponse = self
                .send(self.client.post(self.url(&["ingestion"])?).json(&body))
                .await?;

            for failure in &response.errors {
                tracing::warn!(
                    event_id = %failure.id,
                    status = failure.status,
                    message = failure.message.as_deref().unwrap_or(""),
                    "langfuse rejected event"
                );
            }
            tracing::debug!(sent = count, rejected = response.errors.len(), "flushed langfuse events");
        }

        let links = std::mem::take(&mut *self.run_links.lock().unwrap_or_else(PoisonError::into_inner));
        if links.is_empty() {
            return Ok(());
        }

        let url = self.url(&["dataset-run-items"])?;
        let mut failed = 0;
        for link in &links {
            let result: Result<Value, _> = self.send(self.client.post(url.clone()).json(link)).await;
            if let Err(err) = result {
                failed += 1;
                tracing::warn!(
                    trace_id = %link.trace_id,
                    dataset_item_id = %link.dataset_item_id,
                    error = %err,
                    "failed to link trace to dataset run"
                );
            }
        }
        tracing::debug!(links = links.len(), failed, "linked traces to dataset runs");

        Ok(())
    }
}

/// Keep role/content messages, skip placeholders and anything malformed
fn parse_chat_messages(prompt: Value) -> Vec<ChatMessage> {
    let raw: Vec<PromptMessage> = match serde_json::from_value(prompt) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(error = %err, "chat prompt is not a message list");
            return Vec::new();
        }
    };

    raw.into_iter()
        .filter_map(|message| match (message.kind.as_deref(), message.role, message.content) {
            (Some("placeholder"), _, _) => None,
            (_, Some(role), Some(content)) => Some(ChatMessage { role, content }),
            _ => None,
        })
        .collect()
}

/// Read `model` and `temperature` from a prompt config, per-key defaults
pub fn resolve_prompt_config(config: Option<&Value>) -> PromptConfig {
    let model = config
        .and_then(|c| c.get("model"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let temperature = config
        .and_then(|c| c.get("temperature"))
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_TEMPERATURE);

    PromptConfig { model, temperature }
}

fn into_dataset_item(record: DatasetItemRecord) -> DatasetItem {
    let input = match record.input {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, value_to_string(value)))
            .collect(),
        Value::String(question) => {
            let mut input = HashMap::new();
            input.insert(crate::models::USER_QUESTION_KEY.to_string(), question);
            input
        }
        _ => HashMap::new(),
    };

    let expected_output = match record.expected_output {
        Value::Null => None,
        other => Some(value_to_string(other)),
    };

    DatasetItem {
        id: Some(record.id),
        input,
        expected_output,
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl PromptSource for LangfuseClient {
    async fn get_prompt(&self, name: &str, label: &str) -> anyhow::Result<ResolvedPrompt> {
        Ok(self.fetch_prompt(name, label).await?)
    }
}

#[async_trait]
impl DatasetSource for LangfuseClient {
    async fn get_dataset(&self, name: &str) -> anyhow::Result<Vec<DatasetItem>> {
        Ok(self.fetch_dataset(name).await?)
    }
}

#[async_trait]
impl ScoreSink for LangfuseClient {
    async fn open_span(&self, span: &ItemSpan) -> anyhow::Result<()> {
        self.enqueue(IngestionEvent::new(
            "trace-create",
            json!({
                "id": span.trace_id,
                "name": span.run_name,
                "timestamp": span.started_at,
                "input": span.messages,
                "metadata": { "prompt_label": span.variant },
            }),
        ));

        if let Some(dataset_item_id) = &span.dataset_item_id {
            self.run_links
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DatasetRunLink {
                    run_name: span.run_name.clone(),
                    dataset_item_id: dataset_item_id.clone(),
                    trace_id: span.trace_id.clone(),
                });
        }
        Ok(())
    }

    async fn close_span(&self, span: &ItemSpan, output: Option<&str>) -> anyhow::Result<()> {
        let ended_at = Utc::now();
        let level = if output.is_some() { "DEFAULT" } else { "ERROR" };

        self.enqueue(IngestionEvent::new(
            "generation-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": span.trace_id,
                "name": format!("mistral-{}", span.variant),
                "model": span.config.model,
                "modelParameters": { "temperature": span.config.temperature },
                "input": span.messages,
                "output": output,
                "startTime": span.started_at,
                "endTime": ended_at,
                "level": level,
                "metadata": { "prompt_label": span.variant },
            }),
        ));
        self.enqueue(IngestionEvent::new(
            "trace-create",
            json!({ "id": span.trace_id, "output": output }),
        ));
        Ok(())
    }

    async fn record_score(&self, trace_id: &str, name: &str, value: f64) -> anyhow::Result<()> {
        self.enqueue(IngestionEvent::new(
            "score-create",
            json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": trace_id,
                "name": name,
                "value": value,
                "dataType": "NUMERIC",
            }),
        ));
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(self.flush_events().await?)
    }
}
