use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Key of the dataset input field holding the question sent to the model
pub const USER_QUESTION_KEY: &str = "user_question";

/// A single question/answer pair driving both variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    /// Identifier assigned by the dataset store, if the item came from one
    #[serde(default)]
    pub id: Option<String>,
    /// Template variables, at least `user_question`
    pub input: HashMap<String, String>,
    /// Reference answer
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl DatasetItem {
    pub fn new(question: impl Into<String>, expected_output: impl Into<String>) -> Self {
        let mut input = HashMap::new();
        input.insert(USER_QUESTION_KEY.to_string(), question.into());
        Self {
            id: None,
            input,
            expected_output: Some(expected_output.into()),
        }
    }

    pub fn user_question(&self) -> Option<&str> {
        self.input
            .get(USER_QUESTION_KEY)
            .map(String::as_str)
            .filter(|q| !q.is_empty())
    }

    pub fn expected_output(&self) -> &str {
        self.expected_output.as_deref().unwrap_or_default()
    }
}

/// A chat message, either a template or a compiled one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Model settings attached to a prompt version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Chat model name, `ministral-14b-latest` when the prompt does not set one
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature, `0.5` when the prompt does not set one
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

pub const DEFAULT_MODEL: &str = "ministral-14b-latest";
pub const DEFAULT_TEMPERATURE: f64 = 0.5;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

/// A chat prompt version resolved for one variant label
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrompt {
    pub name: String,
    pub label: String,
    pub version: Option<u32>,
    pub messages: Vec<ChatMessage>,
    pub config: PromptConfig,
}

impl ResolvedPrompt {
    /// Substitute `{{variable}}` placeholders with the item's input values.
    /// Placeholders without a matching variable are left untouched.
    pub fn compile(&self, variables: &HashMap<String, String>) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|message| ChatMessage {
                role: message.role.clone(),
                content: substitute(&message.content, variables),
            })
            .collect()
    }
}

fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    let mut compiled = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        compiled.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let key = after_open[..end].trim();
                match variables.get(key) {
                    Some(value) => compiled.push_str(value),
                    None => compiled.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after_open[end + 2..];
            }
            None => {
                compiled.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    compiled.push_str(rest);
    compiled
}

/// A named metric value in [0.0, 1.0], rounded to 2 decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub name: String,
    pub value: f64,
}

/// Scores obtained by one dataset item under one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub question: Option<String>,
    pub keyword_overlap: f64,
    pub response_length: f64,
}

/// Mean scores of one variant over the whole dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub avg_keyword_overlap: f64,
    pub avg_response_length: f64,
    pub n_items: usize,
}

/// Aggregate and per-item scores for one variant label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRun {
    pub label: String,
    pub result: VariantResult,
    pub items: Vec<ItemOutcome>,
}

/// Aggregated metrics that can be compared between variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AvgKeywordOverlap,
    AvgResponseLength,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::AvgKeywordOverlap, Metric::AvgResponseLength];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::AvgKeywordOverlap => "avg_keyword_overlap",
            Metric::AvgResponseLength => "avg_response_length",
        }
    }

    pub fn value(&self, result: &VariantResult) -> f64 {
        match self {
            Metric::AvgKeywordOverlap => result.avg_keyword_overlap,
            Metric::AvgResponseLength => result.avg_response_length,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    A,
    B,
    Tie,
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Winner::A => f.write_str("A"),
            Winner::B => f.write_str("B"),
            Winner::Tie => f.write_str("Tie"),
        }
    }
}

/// One row of the comparison table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: Metric,
    pub value_a: f64,
    pub value_b: f64,
    pub winner: Winner,
}

/// Per-metric comparison between the two variants, in metric order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub variant_a: String,
    pub variant_b: String,
    pub rows: Vec<MetricComparison>,
}

/// Everything a finished experiment produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub variants: Vec<VariantRun>,
    pub comparison: ComparisonReport,
    #[serde(default)]
    pub descriptions: Vec<(String, String)>,
}
