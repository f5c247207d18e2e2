//! Seams between the experiment runner and the services it talks to

use crate::generation::GenerationError;
use crate::models::{ChatMessage, DatasetItem, PromptConfig, ResolvedPrompt};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Resolves a prompt version by name and label
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn get_prompt(&self, name: &str, label: &str) -> Result<ResolvedPrompt>;
}

/// Supplies the evaluation dataset
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn get_dataset(&self, name: &str) -> Result<Vec<DatasetItem>>;
}

/// Produces a chat completion for compiled messages
#[async_trait]
pub trait ChatGenerator: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: &PromptConfig,
    ) -> Result<String, GenerationError>;
}

/// Best-effort sink for per-item traces and scores.
///
/// Callers treat every error as non-fatal.
#[async_trait]
pub trait ScoreSink: Send + Sync {
    /// Start the trace for one dataset item
    async fn open_span(&self, span: &ItemSpan) -> Result<()>;

    /// End the trace. `output` is `None` when generation failed.
    async fn close_span(&self, span: &ItemSpan, output: Option<&str>) -> Result<()>;

    async fn record_score(&self, trace_id: &str, name: &str, value: f64) -> Result<()>;

    /// Deliver anything buffered so far
    async fn flush(&self) -> Result<()>;
}

/// Observability scope covering one (variant, item) evaluation
#[derive(Debug, Clone)]
pub struct ItemSpan {
    pub trace_id: String,
    pub run_name: String,
    pub variant: String,
    pub dataset_item_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub config: PromptConfig,
    pub started_at: DateTime<Utc>,
}

impl ItemSpan {
    pub fn new(
        run_name: &str,
        variant: &str,
        item: &DatasetItem,
        messages: Vec<ChatMessage>,
        config: PromptConfig,
    ) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            run_name: run_name.to_string(),
            variant: variant.to_string(),
            dataset_item_id: item.id.clone(),
            messages,
            config,
            started_at: Utc::now(),
        }
    }
}
