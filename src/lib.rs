//! # invoice-digest
//!
//! Turn scanned PDF invoices into structured JSON records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! invoices/*.pdf
//!  │
//!  ├─ Stage 1: extract      (no API key needed)
//!  │   ├─ render   rasterise pages via pdfium (spawn_blocking)
//!  │   ├─ ocr      tesseract TSV per page, real page numbers stamped in
//!  │   └─ merge    one header, every row, page order  →  <stem>.tsv
//!  │
//!  └─ Stage 2: synthesize
//!      ├─ llm      one prompt per table (Gemini, or any edgequake-llm provider)
//!      ├─ retry    5 s, 10 s, 20 s, … backoff on quota errors only
//!      └─ parse    strip fences, coerce fields  →  <stem>.json
//! ```
//!
//! Each stage reads the previous stage's artifacts from disk, so stage 2 can
//! be re-run on its own. Documents are processed one at a time; a failing
//! document is recorded in the [`BatchReport`] and the batch moves on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_digest::{extract_all, synthesize_all, Credential, Extractor, PipelineConfig, Synthesizer};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .credential(Credential::from_env("GEMINI_API_KEY")?)
//!         .build()?;
//!
//!     let extractor = Extractor::from_config(&config);
//!     let tables = extract_all(Path::new("invoices"), Path::new(".poc/extract"), &extractor, &config).await?;
//!     eprintln!("{}/{} tables", tables.succeeded(), tables.attempted);
//!
//!     let synthesizer = Synthesizer::from_config(&config)?;
//!     let digests = synthesize_all(Path::new(".poc/extract"), Path::new(".poc/synthesis"), &synthesizer, &config).await?;
//!     for failure in &digests.failures {
//!         eprintln!("{}: {}", failure.input.display(), failure.error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-digest` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod synthesize;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Credential, PipelineConfig, PipelineConfigBuilder};
pub use error::{DigestError, InferenceError, ItemError};
pub use extract::{extract_all, Extractor};
pub use output::{BatchReport, Digest, DocumentTable, ItemFailure, LineItem, PageTable, Stage};
pub use pipeline::llm::InferenceService;
pub use pipeline::ocr::OcrEngine;
pub use pipeline::render::Rasterizer;
pub use pipeline::retry::{RetryPolicy, RetryState, RetryingClient, Sleeper, TokioSleeper};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::run_all;
pub use synthesize::{synthesize_all, Synthesizer};
