use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration for one A/B experiment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExperimentConfig {
    /// Name of the chat prompt holding both variants
    #[serde(default = "default_prompt_name")]
    pub prompt_name: String,
    /// Name of the evaluation dataset
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    /// Prompt labels to compare, in report order
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,
    /// Human readable description of each variant, printed under the table
    #[serde(default = "default_variant_descriptions")]
    pub variant_descriptions: BTreeMap<String, String>,
    /// OpenAI-compatible chat completion endpoint
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name containing the chat API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Optional cap on generated tokens, the model default applies when unset
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Rate limit for chat requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// HTTP timeout for every outbound request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Langfuse base URL, falls back to `LANGFUSE_HOST`
    #[serde(default)]
    pub langfuse_host: Option<String>,
    /// Environment variable name containing the Langfuse public key
    #[serde(default = "default_langfuse_public_key_env")]
    pub langfuse_public_key_env: String,
    /// Environment variable name containing the Langfuse secret key
    #[serde(default = "default_langfuse_secret_key_env")]
    pub langfuse_secret_key_env: String,
    /// Optional local path to store the report as JSON
    #[serde(default)]
    pub storage_path: Option<String>,
}

pub const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";

fn default_prompt_name() -> String {
    "mistral-ab-test".to_string()
}

fn default_dataset_name() -> String {
    "ab-test-eval-set".to_string()
}

fn default_variants() -> Vec<String> {
    vec!["a".to_string(), "b".to_string()]
}

fn default_variant_descriptions() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("a".to_string(), "Concise and direct (temp=0.3)".to_string()),
        ("b".to_string(), "Chain-of-thought detailed (temp=0.7)".to_string()),
    ])
}

fn default_api_endpoint() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "MISTRAL_API_KEY".to_string()
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_langfuse_public_key_env() -> String {
    "LANGFUSE_PUBLIC_KEY".to_string()
}

fn default_langfuse_secret_key_env() -> String {
    "LANGFUSE_SECRET_KEY".to_string()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            prompt_name: default_prompt_name(),
            dataset_name: default_dataset_name(),
            variants: default_variants(),
            variant_descriptions: default_variant_descriptions(),
            api_endpoint: default_api_endpoint(),
            env_var_api_key: default_env_var_api_key(),
            max_tokens: None,
            rate_limit_rps: default_rate_limit(),
            timeout_secs: default_timeout_secs(),
            langfuse_host: None,
            langfuse_public_key_env: default_langfuse_public_key_env(),
            langfuse_secret_key_env: default_langfuse_secret_key_env(),
            storage_path: None,
        }
    }
}

impl ExperimentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.variants.len() != 2 {
            bail!(
                "Exactly two variants are required, got {}: {:?}",
                self.variants.len(),
                self.variants
            );
        }
        if self.variants[0] == self.variants[1] {
            bail!("Variant labels must differ, both are {:?}", self.variants[0]);
        }
        if self.prompt_name.trim().is_empty() || self.dataset_name.trim().is_empty() {
            bail!("prompt_name and dataset_name must not be empty");
        }
        Ok(())
    }

    /// Langfuse base URL: config value, then `LANGFUSE_HOST`, then the cloud default
    pub fn resolved_langfuse_host(&self) -> String {
        self.langfuse_host
            .clone()
            .or_else(|| std::env::var("LANGFUSE_HOST").ok())
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGFUSE_HOST.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Description for a variant label, if one is configured
    pub fn description(&self, label: &str) -> Option<&str> {
        self.variant_descriptions.get(label).map(String::as_str)
    }
}

/// Load `.env` from the working directory if present.
///
/// Runs before logging is set up so `RUST_LOG` can come from the file.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
prompt_name = "support-bot"
dataset_name = "support-questions"
variants = ["control", "candidate"]
api_endpoint = "https://llm.internal/v1"
env_var_api_key = "LLM_API_KEY"
max_tokens = 200
rate_limit_rps = 2.5
timeout_secs = 15
langfuse_host = "https://langfuse.internal/"
storage_path = "/tmp/ab-results.json"

[variant_descriptions]
control = "Current production prompt"
candidate = "Rewritten prompt"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = ExperimentConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.prompt_name, "support-bot");
        assert_eq!(config.dataset_name, "support-questions");
        assert_eq!(config.variants, vec!["control", "candidate"]);
        assert_eq!(config.env_var_api_key, "LLM_API_KEY");
        assert_eq!(config.max_tokens, Some(200));
        assert_eq!(config.rate_limit_rps, 2.5);
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.resolved_langfuse_host(), "https://langfuse.internal");
        assert_eq!(config.storage_path.as_deref(), Some("/tmp/ab-results.json"));
        assert_eq!(config.description("control"), Some("Current production prompt"));
        assert_eq!(config.description("a"), None);
    }

    #[test]
    fn test_config_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "storage_path = \"out/report.json\"\n").unwrap();

        let config = ExperimentConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.prompt_name, "mistral-ab-test");
        assert_eq!(config.dataset_name, "ab-test-eval-set");
        assert_eq!(config.variants, vec!["a", "b"]);
        assert_eq!(config.api_endpoint, "https://api.mistral.ai/v1");
        assert_eq!(config.env_var_api_key, "MISTRAL_API_KEY");
        assert_eq!(config.rate_limit_rps, 10.0);
        assert_eq!(config.max_tokens, None);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.langfuse_public_key_env, "LANGFUSE_PUBLIC_KEY");
        assert_eq!(config.langfuse_secret_key_env, "LANGFUSE_SECRET_KEY");
        assert_eq!(config.description("a"), Some("Concise and direct (temp=0.3)"));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = ExperimentConfig::load(None).unwrap();
        assert_eq!(config.variants, vec!["a", "b"]);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_config_rejects_wrong_variant_count() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "variants = [\"a\", \"b\", \"c\"]\n").unwrap();

        let result = ExperimentConfig::from_file(temp_file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Exactly two variants"));
    }

    #[test]
    fn test_config_rejects_duplicate_variants() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "variants = [\"a\", \"a\"]\n").unwrap();

        assert!(ExperimentConfig::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "variants = [\"a\"").unwrap();

        let result = ExperimentConfig::from_file(temp_file.path());
        assert!(result.unwrap_err().to_string().contains("Failed to parse TOML config"));
    }

    #[test]
    fn test_config_missing_file() {
        let result = ExperimentConfig::from_file(Path::new("/nonexistent/ab-test.toml"));
        assert!(result.unwrap_err().to_string().contains("Failed to read config file"));
    }
}
