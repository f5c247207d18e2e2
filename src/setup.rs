//! One-off seeding of the prompt versions and evaluation dataset

use crate::config::ExperimentConfig;
use crate::langfuse::LangfuseClient;
use crate::models::{ChatMessage, DEFAULT_MODEL, DatasetItem, PromptConfig};
use anyhow::{Context, Result};
use tracing::info;

/// A prompt version to create under its own label
#[derive(Debug, Clone)]
pub struct VariantSeed {
    pub label: &'static str,
    pub system_prompt: &'static str,
    pub temperature: f64,
}

pub const VARIANT_SEEDS: [VariantSeed; 2] = [
    VariantSeed {
        label: "a",
        system_prompt: "You are a helpful and direct assistant. Answer concisely in at most 2 sentences.",
        temperature: 0.3,
    },
    VariantSeed {
        label: "b",
        system_prompt: "You are an expert assistant. Think step by step before answering. Provide a detailed explanation with examples when possible.",
        temperature: 0.7,
    },
];

const DATASET_DESCRIPTION: &str = "Dataset for A/B prompt testing with Mistral 8B";

const DATASET_SEED: [(&str, &str); 8] = [
    (
        "What is recursion in programming?",
        "Recursion is when a function calls itself to solve a problem by breaking it down into smaller subproblems.",
    ),
    (
        "Explain what a REST API is.",
        "A REST API is an interface that follows REST principles for communication between systems using HTTP.",
    ),
    (
        "What is the difference between a list and a tuple in Python?",
        "Lists are mutable and tuples are immutable.",
    ),
    (
        "What is Big O notation?",
        "Big O is a notation to describe the time or space complexity of an algorithm.",
    ),
    (
        "Explain the concept of closure in JavaScript.",
        "A closure is a function that has access to the outer function's scope even after it has returned.",
    ),
    (
        "What is a relational database?",
        "A relational database organizes data into tables with rows and columns, using relations between them.",
    ),
    (
        "What is Docker used for?",
        "Docker is used to create containers that package an application with all its dependencies.",
    ),
    (
        "What is machine learning?",
        "Machine learning is a field of AI where algorithms learn patterns from data without being explicitly programmed.",
    ),
];

/// Chat template for a variant: its system prompt plus the user question
pub fn prompt_messages(seed: &VariantSeed) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(seed.system_prompt),
        ChatMessage::user("{{user_question}}"),
    ]
}

pub fn dataset_items() -> Vec<DatasetItem> {
    DATASET_SEED
        .iter()
        .map(|(question, answer)| DatasetItem::new(*question, *answer))
        .collect()
}

/// Create both prompt versions and the evaluation dataset
pub async fn seed(client: &LangfuseClient, config: &ExperimentConfig) -> Result<()> {
    for variant in &VARIANT_SEEDS {
        let prompt_config = PromptConfig {
            model: DEFAULT_MODEL.to_string(),
            temperature: variant.temperature,
        };
        client
            .create_prompt(
                &config.prompt_name,
                &prompt_messages(variant),
                &prompt_config,
                variant.label,
            )
            .await
            .with_context(|| format!("Failed to create prompt version {}", variant.label))?;
        info!(label = variant.label, "prompt version {} created", variant.label.to_uppercase());
    }

    client
        .create_dataset(&config.dataset_name, DATASET_DESCRIPTION)
        .await
        .with_context(|| format!("Failed to create dataset: {}", config.dataset_name))?;

    let items = dataset_items();
    for item in &items {
        client
            .create_dataset_item(&config.dataset_name, item)
            .await
            .with_context(|| {
                format!(
                    "Failed to create dataset item: {}",
                    item.user_question().unwrap_or_default()
                )
            })?;
    }
    info!(dataset = %config.dataset_name, items = items.len(), "dataset created");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::langfuse::LangfuseConfig;
    use crate::scoring::keyword_overlap;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_dataset_items_are_complete() {
        let items = dataset_items();
        assert_eq!(items.len(), 8);
        for item in &items {
            assert!(item.user_question().is_some());
            assert!(!item.expected_output().is_empty());
            // every reference answer fully overlaps with itself
            assert_eq!(keyword_overlap(item.expected_output(), item.expected_output()).value, 1.0);
        }
    }

    #[test]
    fn test_prompt_messages_template_user_question() {
        let messages = prompt_messages(&VARIANT_SEEDS[1]);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("You are an expert assistant."));
        assert_eq!(messages[1], ChatMessage::user("{{user_question}}"));
    }

    #[tokio::test]
    async fn test_seed_creates_prompts_dataset_and_items() {
        let mut server = mockito::Server::new_async().await;
        let prompts = server
            .mock("POST", "/api/public/v2/prompts")
            .match_body(Matcher::PartialJson(json!({ "name": "mistral-ab-test", "type": "chat" })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;
        let dataset = server
            .mock("POST", "/api/public/v2/datasets")
            .match_body(Matcher::PartialJson(json!({ "name": "ab-test-eval-set" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let items = server
            .mock("POST", "/api/public/dataset-items")
            .match_body(Matcher::PartialJson(json!({ "datasetName": "ab-test-eval-set" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .expect(8)
            .create_async()
            .await;

        let client = LangfuseClient::new(LangfuseConfig {
            host: server.url(),
            public_key: "pk-lf-test".to_string(),
            secret_key: "sk-lf-test".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        seed(&client, &ExperimentConfig::default()).await.unwrap();

        prompts.assert_async().await;
        dataset.assert_async().await;
        items.assert_async().await;
    }

    #[tokio::test]
    async fn test_seed_stops_on_first_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/public/v2/prompts")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let dataset = server
            .mock("POST", "/api/public/v2/datasets")
            .expect(0)
            .create_async()
            .await;

        let client = LangfuseClient::new(LangfuseConfig {
            host: server.url(),
            public_key: "pk-lf-test".to_string(),
            secret_key: "sk-lf-test".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        let err = seed(&client, &ExperimentConfig::default()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to create prompt version a"));
        dataset.assert_async().await;
    }
}
