//! Configuration types for the invoice pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The API credential is a separate
//! [`Credential`] value: it is loaded once at startup and handed to the
//! inference client that needs it, instead of being looked up from the
//! environment deep inside a request.

use crate::error::DigestError;
use crate::pipeline::llm::InferenceService;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the Gemini API key.
pub const CREDENTIAL_ENV_KEY: &str = "GEMINI_API_KEY";

/// Default model for the synthesis stage.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// A secret API key. `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Read `key` from the process environment, falling back to a `.env`
    /// file in the working directory (or any parent).
    ///
    /// Surrounding quotes in `.env` values are stripped by `dotenvy`.
    pub fn from_env(key: &str) -> Result<Self, DigestError> {
        if let Some(e) = dotenv_problem(dotenvy::dotenv()) {
            warn!("Ignoring .env file: {}", e);
        }
        match std::env::var(key) {
            Ok(v) if !v.trim().is_empty() => Ok(Self(v.trim().to_string())),
            _ => Err(DigestError::MissingCredential {
                key: key.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// A missing `.env` is normal; anything else (bad syntax, unreadable file)
/// is worth a warning.
fn dotenv_problem<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Configuration for both pipeline stages.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice_digest::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .max_retries(3)
///     .pacing_delay(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── Stage 1: rasterise + OCR ─────────────────────────────────────────
    /// Longest edge of a rendered page, in pixels. Default: 2400.
    ///
    /// Tesseract is most accurate around 300 DPI; 2400 px on the long edge is
    /// roughly that for A4 and Letter pages.
    pub max_rendered_pixels: u32,

    /// Explicit pdfium library path. If None, looks in the working directory
    /// and then the system library path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Tesseract executable. Default: `tesseract` (resolved via `PATH`).
    pub tesseract_path: PathBuf,

    /// Tesseract language pack(s), e.g. `eng` or `eng+pol`. Default: `eng`.
    pub ocr_language: String,

    /// Per-page OCR timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    // ── Stage 2: inference ───────────────────────────────────────────────
    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Provider name for `edgequake-llm` (e.g. "openai", "anthropic").
    /// None or "gemini" uses the built-in Gemini client.
    pub provider_name: Option<String>,

    /// Pre-constructed inference service. Takes precedence over everything else.
    pub service: Option<Arc<dyn InferenceService>>,

    /// API key for the Gemini client.
    pub credential: Option<Credential>,

    /// Maximum attempts per document when the service reports a quota error.
    /// Default: 5. Other errors are never retried.
    pub max_retries: u32,

    /// First backoff wait; doubles on each quota error. Default: 5 s
    /// (5, 10, 20, 40, … seconds).
    pub retry_base_delay: Duration,

    /// Flat wait between two consecutive documents in stage 2. Default: 5 s.
    pub pacing_delay: Duration,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens per response. Default: 8192.
    pub max_tokens: usize,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom extraction prompt. If None, uses the built-in prompt.
    pub prompt: Option<String>,

    // ── Shared ───────────────────────────────────────────────────────────
    /// Per-item progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2400,
            pdfium_lib_path: None,
            tesseract_path: PathBuf::from("tesseract"),
            ocr_language: "eng".to_string(),
            ocr_timeout_secs: 120,
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            service: None,
            credential: None,
            max_retries: 5,
            retry_base_delay: Duration::from_secs(5),
            pacing_delay: Duration::from_secs(5),
            temperature: 0.1,
            max_tokens: 8192,
            api_timeout_secs: 120,
            prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("tesseract_path", &self.tesseract_path)
            .field("ocr_language", &self.ocr_language)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("service", &self.service.as_ref().map(|_| "<dyn InferenceService>"))
            .field("credential", &self.credential)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("pacing_delay", &self.pacing_delay)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when stage 2 should go through the built-in Gemini client.
    pub fn uses_gemini(&self) -> bool {
        self.provider_name
            .as_deref()
            .is_none_or(|p| p.eq_ignore_ascii_case("gemini"))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn service(mut self, service: Arc<dyn InferenceService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.config.credential = Some(credential);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.max(1);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn pacing_delay(mut self, delay: Duration) -> Self {
        self.config.pacing_delay = delay;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DigestError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(DigestError::InvalidConfig("model must not be empty".into()));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(DigestError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(DigestError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dotenv_is_silent_but_malformed_is_reported() {
        assert!(dotenv_problem(dotenvy::from_path("/definitely/not/here/.env")).is_none());
        assert!(dotenv_problem(dotenvy::from_read("KEY=\"unterminated\n".as_bytes())).is_some());
        assert!(dotenv_problem(Ok(())).is_none());
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.retry_base_delay, Duration::from_secs(5));
        assert_eq!(c.pacing_delay, Duration::from_secs(5));
        assert_eq!(c.model, DEFAULT_MODEL);
        assert!(c.uses_gemini());
    }

    #[test]
    fn builder_clamps_retries_to_one() {
        let c = PipelineConfig::builder().max_retries(0).build().unwrap();
        assert_eq!(c.max_retries, 1);
    }

    #[test]
    fn builder_rejects_empty_model() {
        let err = PipelineConfig::builder().model("  ").build().unwrap_err();
        assert!(matches!(err, DigestError::InvalidConfig(_)));
    }

    #[test]
    fn named_provider_disables_gemini_client() {
        let c = PipelineConfig::builder()
            .provider_name("openai")
            .build()
            .unwrap();
        assert!(!c.uses_gemini());
        let c = PipelineConfig::builder()
            .provider_name("Gemini")
            .build()
            .unwrap();
        assert!(c.uses_gemini());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("sk-very-secret");
        let shown = format!("{cred:?}");
        assert!(!shown.contains("very-secret"));
        assert_eq!(cred.expose(), "sk-very-secret");
    }

    #[test]
    fn missing_credential_is_a_config_error() {
        let err = Credential::from_env("INVOICE_DIGEST_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, DigestError::MissingCredential { .. }));
    }
}
