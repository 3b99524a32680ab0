//! Error types for the invoice-digest library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`DigestError`] — **Fatal**: the batch cannot start at all (credential
//!   missing, provider not configured, input directory unreadable). Returned
//!   as `Err(DigestError)` from the top-level `extract_all` / `synthesize_all`.
//!
//! * [`ItemError`] — **Non-fatal**: one document failed (bad PDF, OCR crash,
//!   unparseable model output) but the rest of the batch is fine. Stored in
//!   [`crate::output::BatchReport::failures`] next to the offending filename.
//!
//! * [`InferenceError`] — what a remote model call can fail with. The retry
//!   client uses [`InferenceError::is_rate_limited`] to decide between backing
//!   off and giving up; whatever survives the retries becomes an
//!   [`ItemError::Inference`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice-digest library.
///
/// Per-document failures use [`ItemError`] and never escape a batch.
#[derive(Debug, Error)]
pub enum DigestError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// The API credential was not found in the environment or `.env` file.
    #[error("Credential '{key}' is not set.\nExport it or add `{key}=...` to a .env file.")]
    MissingCredential { key: String },

    /// The configured provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Batch setup errors ────────────────────────────────────────────────
    /// The input directory does not exist or cannot be listed.
    #[error("Cannot read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output directory could not be created.
    #[error("Cannot create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single call to the remote inference service.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceError {
    /// Quota or rate limit hit (HTTP 429, `RESOURCE_EXHAUSTED`). Transient.
    #[error("rate limited by '{provider}': {detail}")]
    RateLimited { provider: String, detail: String },

    /// Any other service failure: bad request, auth, network, empty answer.
    #[error("'{provider}' request failed: {detail}")]
    Service { provider: String, detail: String },

    /// Every attempt was rate limited.
    #[error("still rate limited after {attempts} attempts: {detail}")]
    RetriesExhausted { attempts: u32, detail: String },
}

impl InferenceError {
    /// True for the quota condition the retry client backs off on.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, InferenceError::RateLimited { .. })
    }

    /// Classify a raw provider error message.
    ///
    /// Providers surface quota exhaustion inconsistently: a bare `429`, the
    /// gRPC status name `RESOURCE_EXHAUSTED`, or prose like "rate limit".
    pub fn classify(provider: &str, message: impl Into<String>) -> Self {
        let detail = message.into();
        let lower = detail.to_lowercase();
        if detail.contains("429")
            || detail.contains("RESOURCE_EXHAUSTED")
            || lower.contains("rate limit")
            || lower.contains("quota")
        {
            InferenceError::RateLimited {
                provider: provider.to_string(),
                detail,
            }
        } else {
            InferenceError::Service {
                provider: provider.to_string(),
                detail,
            }
        }
    }
}

/// A non-fatal error for a single input document.
///
/// Caught at the batch boundary, logged with the file name and stored in
/// [`crate::output::ItemFailure`]. The batch moves on to the next input.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ItemError {
    /// The input file could not be read.
    #[error("cannot read '{path}': {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// The file was read but is not a PDF.
    #[error("'{path}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The document produced no pages, or its first page has no header row.
    #[error("'{path}' produced no OCR table: {detail}")]
    EmptyDocument { path: PathBuf, detail: String },

    /// pdfium could not open or render the document.
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The OCR engine failed on a page.
    #[error("OCR failed on page {page}: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The model call failed for good.
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// The model answered with something that is not a JSON object.
    #[error("model response is not a JSON object: {detail}")]
    MalformedResponse { detail: String },

    /// The artifact could not be written.
    #[error("failed to write '{path}': {detail}")]
    WriteFailed { path: PathBuf, detail: String },
}
