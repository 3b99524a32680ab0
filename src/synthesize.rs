//! Stage 2: OCR tables → invoice digests.
//!
//! For every `*.tsv` in the input directory: build the prompt, call the model
//! through the [`RetryingClient`], parse the answer into a [`Digest`] and
//! write `<stem>.json`. Consecutive documents are separated by a flat pacing
//! wait so a batch does not run straight into the service's rate limit.

use crate::batch::{run_batch, Pacing};
use crate::config::{PipelineConfig, CREDENTIAL_ENV_KEY};
use crate::error::{DigestError, ItemError};
use crate::output::{BatchReport, Digest, Stage};
use crate::pipeline::input::{
    artifact_path, ensure_output_dir, list_inputs, write_artifact, DIGEST_EXTENSION,
    TABLE_EXTENSION,
};
use crate::pipeline::llm::{GeminiService, InferenceService, ProviderService};
use crate::pipeline::parse::parse_digest;
use crate::pipeline::retry::{RetryPolicy, RetryingClient, Sleeper, TokioSleeper};
use crate::prompts::build_prompt;
use edgequake_llm::ProviderFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Turns one OCR table into one digest.
#[derive(Clone)]
pub struct Synthesizer {
    client: RetryingClient,
    prompt: Option<String>,
    sleeper: Arc<dyn Sleeper>,
}

impl Synthesizer {
    pub fn new(client: RetryingClient) -> Self {
        Self {
            client,
            prompt: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Resolve the inference service from `config` and wrap it in a retrying
    /// client.
    ///
    /// # Errors
    /// [`DigestError::MissingCredential`] when the Gemini client is selected
    /// but no credential was configured; [`DigestError::ProviderNotConfigured`]
    /// when a named provider cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DigestError> {
        let service = resolve_service(config)?;
        info!("Using inference service '{}' ({})", service.name(), config.model);
        let client = RetryingClient::new(service, RetryPolicy::from_config(config));
        let mut synthesizer = Self::new(client);
        synthesizer.prompt = config.prompt.clone();
        Ok(synthesizer)
    }

    /// Replace the sleeper used for backoff and pacing.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.client = self.client.with_sleeper(Arc::clone(&sleeper));
        self.sleeper = sleeper;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Ask the model for the digest of one table.
    pub async fn digest_table(&self, table: &str) -> Result<Digest, ItemError> {
        let prompt = build_prompt(self.prompt.as_deref(), table);
        let raw = self.client.invoke(&prompt).await?;
        debug!("{} answered with {} chars", self.client.service_name(), raw.len());
        parse_digest(&raw)
    }

    /// Digest `table_path` and write `<output_dir>/<stem>.json`.
    pub async fn synthesize_to_file(
        &self,
        table_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ItemError> {
        let table = tokio::fs::read_to_string(table_path)
            .await
            .map_err(|e| ItemError::ReadFailed {
                path: table_path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let digest = self.digest_table(&table).await?;

        let output = artifact_path(output_dir, table_path, DIGEST_EXTENSION);
        let json = serde_json::to_string_pretty(&digest).map_err(|e| ItemError::WriteFailed {
            path: output.clone(),
            detail: format!("cannot serialise digest: {e}"),
        })?;
        write_artifact(&output, &json).await?;
        Ok(output)
    }
}

/// Run stage 2 over every table in `input_dir`.
///
/// # Errors
/// Only batch-level failures: unreadable input directory or uncreatable
/// output directory. Per-document failures are recorded in the report.
pub async fn synthesize_all(
    input_dir: &Path,
    output_dir: &Path,
    synthesizer: &Synthesizer,
    config: &PipelineConfig,
) -> Result<BatchReport, DigestError> {
    info!("Extract directory: {}", input_dir.display());
    info!("Output directory: {}", output_dir.display());

    let inputs = list_inputs(input_dir, TABLE_EXTENSION)?;
    if inputs.is_empty() {
        info!("No TSV files found in {}", input_dir.display());
        return Ok(BatchReport::empty(Stage::Synthesize));
    }
    ensure_output_dir(output_dir)?;
    info!("Found {} TSV file(s) to process.", inputs.len());

    let pacing = Pacing {
        delay: config.pacing_delay,
        sleeper: synthesizer.sleeper.as_ref(),
    };

    Ok(run_batch(
        Stage::Synthesize,
        inputs,
        config.progress_callback.as_ref(),
        Some(pacing),
        |table| async move { synthesizer.synthesize_to_file(&table, output_dir).await },
    )
    .await)
}

/// Resolve the inference service, from most-specific to least-specific:
///
/// 1. **Pre-built service** (`config.service`), used as-is.
/// 2. **Gemini** (no provider name, or `"gemini"`): needs `config.credential`.
/// 3. **Named provider** via `edgequake-llm`'s `ProviderFactory`, which reads
///    that provider's own API key variable.
fn resolve_service(config: &PipelineConfig) -> Result<Arc<dyn InferenceService>, DigestError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }

    if config.uses_gemini() {
        let credential = config
            .credential
            .clone()
            .ok_or_else(|| DigestError::MissingCredential {
                key: CREDENTIAL_ENV_KEY.to_string(),
            })?;
        let service =
            GeminiService::new(credential, config).map_err(|e| DigestError::ProviderNotConfigured {
                provider: "gemini".to_string(),
                hint: e.to_string(),
            })?;
        return Ok(Arc::new(service));
    }

    let name = config.provider_name.as_deref().unwrap_or_default();
    let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
        DigestError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderService::new(provider, name, config)))
}
