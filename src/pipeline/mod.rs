//! Pipeline stages for invoice digestion.
//!
//! Each submodule implements exactly one transformation step, behind a trait
//! where the step talks to something outside the process, so every stage can
//! be tested with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──▶ merge ──▶ <stem>.tsv
//! (list)    (pdfium)  (tesseract)        │
//!                                        ▼
//!            <stem>.json ◀── parse ◀── retry ◀── llm
//!                           (coerce)  (backoff)  (Gemini / edgequake-llm)
//! ```
//!
//! 1. [`input`]  — list inputs in name order, derive artifact paths, write
//!    artifacts atomically
//! 2. [`render`] — rasterise every page; runs in `spawn_blocking`
//! 3. [`ocr`]    — one positional TSV table per page
//! 4. [`merge`]  — one header, all rows, page order
//! 5. [`llm`]    — a single model call, errors classified as quota or not
//! 6. [`retry`]  — bounded exponential backoff on quota errors
//! 7. [`parse`]  — fence stripping and field coercion into a `Digest`

pub mod input;
pub mod llm;
pub mod merge;
pub mod ocr;
pub mod parse;
pub mod render;
pub mod retry;
