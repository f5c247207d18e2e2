use crate::comparison::{aggregate, compare};
use crate::config::ExperimentConfig;
use crate::generation::GenerationError;
use crate::models::{
    ChatMessage, DatasetItem, ExperimentReport, ItemOutcome, Metric, ResolvedPrompt, ScoreRecord,
    VariantRun,
};
use crate::providers::{ChatGenerator, DatasetSource, ItemSpan, PromptSource, ScoreSink};
use crate::scoring::{keyword_overlap, response_length};
use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Characters of each generated answer shown in the log
const OUTPUT_PREVIEW_CHARS: usize = 120;

/// Main runner that orchestrates the A/B experiment
pub struct Runner {
    config: ExperimentConfig,
    prompts: Arc<dyn PromptSource>,
    dataset: Arc<dyn DatasetSource>,
    generator: Arc<dyn ChatGenerator>,
    sink: Arc<dyn ScoreSink>,
}

impl Runner {
    /// Create a new runner with the given configuration and collaborators
    pub fn new(
        config: ExperimentConfig,
        prompts: Arc<dyn PromptSource>,
        dataset: Arc<dyn DatasetSource>,
        generator: Arc<dyn ChatGenerator>,
        sink: Arc<dyn ScoreSink>,
    ) -> Self {
        Self {
            config,
            prompts,
            dataset,
            generator,
            sink,
        }
    }

    /// Load the dataset, evaluate both variants and compare them
    pub async fn run_experiment(&self) -> Result<ExperimentReport> {
        let dataset = self
            .dataset
            .get_dataset(&self.config.dataset_name)
            .await
            .with_context(|| format!("Failed to load dataset: {}", self.config.dataset_name))?;
        info!(dataset = %self.config.dataset_name, items = dataset.len(), "loaded dataset");

        let outcome = self.run_variants(&self.config.variants, &dataset).await;
        self.flush_sink().await;
        let runs = outcome?;

        let report = self.build_report(runs)?;
        self.store_results_if_configured(&report)?;

        Ok(report)
    }

    /// Evaluate every variant over the dataset, one after another
    pub async fn run_variants(
        &self,
        variants: &[String],
        dataset: &[DatasetItem],
    ) -> Result<Vec<VariantRun>> {
        let mut runs = Vec::with_capacity(variants.len());

        for label in variants {
            let run = self
                .run_variant(label, dataset)
                .await
                .with_context(|| format!("Experiment for variant {:?} failed", label))?;
            runs.push(run);
        }

        Ok(runs)
    }

    /// Evaluate a single variant over all items, in dataset order
    async fn run_variant(&self, label: &str, dataset: &[DatasetItem]) -> Result<VariantRun> {
        let run_name = format!("ab-test-prompt-{}", label);
        info!(run = %run_name, "running experiment");

        let prompt = self
            .prompts
            .get_prompt(&self.config.prompt_name, label)
            .await
            .with_context(|| {
                format!("Failed to resolve prompt {}@{}", self.config.prompt_name, label)
            })?;
        debug!(
            prompt = %prompt.name,
            version = ?prompt.version,
            model = %prompt.config.model,
            temperature = prompt.config.temperature,
            "resolved prompt"
        );

        let total_items = dataset.len();
        let mut items = Vec::with_capacity(total_items);

        for (index, item) in dataset.iter().enumerate() {
            let item_num = index + 1;
            let outcome = self
                .evaluate_item(&prompt, &run_name, item)
                .await
                .with_context(|| {
                    format!("Failed to evaluate item {}/{} of {}", item_num, total_items, run_name)
                })?;
            items.push(outcome);
        }

        let result = aggregate(&items);
        info!(
            run = %run_name,
            n_items = result.n_items,
            avg_keyword_overlap = result.avg_keyword_overlap,
            avg_response_length = result.avg_response_length,
            "experiment finished"
        );

        Ok(VariantRun {
            label: label.to_string(),
            result,
            items,
        })
    }

    /// Generate and score one item inside its own trace span
    async fn evaluate_item(
        &self,
        prompt: &ResolvedPrompt,
        run_name: &str,
        item: &DatasetItem,
    ) -> Result<ItemOutcome> {
        let question = item.user_question().map(str::to_string);
        info!(question = question.as_deref().unwrap_or("<missing>"), "Q");

        let messages = prompt.compile(&item.input);
        let span = ItemSpan::new(run_name, &prompt.label, item, messages, prompt.config.clone());
        self.open_span(&span).await;

        let generated = self.generate_output(prompt, item, &span.messages).await;
        self.close_span(&span, generated.as_ref().ok().map(String::as_str))
            .await;
        let output = generated?;

        info!(answer = %preview(&output), "A");

        let overlap = keyword_overlap(&output, item.expected_output());
        let length = response_length(&output);
        self.record_score(&span.trace_id, &overlap).await;
        self.record_score(&span.trace_id, &length).await;

        Ok(ItemOutcome {
            question,
            keyword_overlap: overlap.value,
            response_length: length.value,
        })
    }

    /// Items without a question are not sent to the model and score zero
    async fn generate_output(
        &self,
        prompt: &ResolvedPrompt,
        item: &DatasetItem,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        if item.user_question().is_none() {
            warn!(item = ?item.id, "dataset item has no user_question, skipping generation");
            return Ok(String::new());
        }
        if item.expected_output().is_empty() {
            warn!(item = ?item.id, "dataset item has no expected_output");
        }

        self.generator.generate(messages, &prompt.config).await
    }

    async fn open_span(&self, span: &ItemSpan) {
        if let Err(err) = self.sink.open_span(span).await {
            warn!(trace_id = %span.trace_id, error = %format!("{:#}", err), "failed to open trace span");
        }
    }

    async fn close_span(&self, span: &ItemSpan, output: Option<&str>) {
        if let Err(err) = self.sink.close_span(span, output).await {
            warn!(trace_id = %span.trace_id, error = %format!("{:#}", err), "failed to close trace span");
        }
    }

    async fn record_score(&self, trace_id: &str, score: &ScoreRecord) {
        if let Err(err) = self.sink.record_score(trace_id, &score.name, score.value).await {
            warn!(trace_id, score = %score.name, error = %format!("{:#}", err), "failed to record score");
        }
    }

    async fn flush_sink(&self) {
        if let Err(err) = self.sink.flush().await {
            warn!(error = %format!("{:#}", err), "failed to flush traces and scores");
        }
    }

    /// Compare the first two variant runs
    fn build_report(&self, runs: Vec<VariantRun>) -> Result<ExperimentReport> {
        if runs.len() != 2 {
            bail!("Expected results for two variants, got {}", runs.len());
        }

        let comparison = compare(&runs[0], &runs[1], &Metric::ALL);
        let descriptions = runs
            .iter()
            .filter_map(|run| {
                self.config
                    .description(&run.label)
                    .map(|description| (run.label.clone(), description.to_string()))
            })
            .collect();

        Ok(ExperimentReport {
            variants: runs,
            comparison,
            descriptions,
        })
    }

    /// Store the report if a storage path is configured
    fn store_results_if_configured(&self, report: &ExperimentReport) -> Result<()> {
        if let Some(storage_path) = &self.config.storage_path {
            debug!(path = %storage_path, "storing results");
            self.store_results(report, storage_path)?;
        }
        Ok(())
    }

    /// Store the report to a JSON file
    fn store_results(&self, report: &ExperimentReport, path: &str) -> Result<()> {
        let json_content = serde_json::to_string_pretty(report)
            .context("Failed to serialize results to JSON")?;
        self.ensure_directory_exists(path)?;
        std::fs::write(path, json_content)
            .with_context(|| format!("Failed to write results to: {}", path))?;
        info!(path, "results stored");

        Ok(())
    }

    /// Ensure the directory for the results file exists
    fn ensure_directory_exists(&self, path: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }
}

fn preview(output: &str) -> String {
    let mut preview: String = output.chars().take(OUTPUT_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}
