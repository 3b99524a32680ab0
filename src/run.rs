//! Both stages back to back.

use crate::config::PipelineConfig;
use crate::error::DigestError;
use crate::extract::{extract_all, Extractor};
use crate::output::BatchReport;
use crate::pipeline::input::ensure_output_dir;
use crate::synthesize::{synthesize_all, Synthesizer};
use std::path::Path;

/// Run stage 1 into `tables_dir`, then stage 2 from `tables_dir` into
/// `digests_dir`.
///
/// `tables_dir` is created up front, so an invoice directory without PDFs
/// yields two empty reports instead of a missing-directory error in stage 2.
/// Stage 2 also picks up tables left there by earlier runs.
pub async fn run_all(
    input_dir: &Path,
    tables_dir: &Path,
    digests_dir: &Path,
    extractor: &Extractor,
    synthesizer: &Synthesizer,
    config: &PipelineConfig,
) -> Result<(BatchReport, BatchReport), DigestError> {
    ensure_output_dir(tables_dir)?;
    let extracted = extract_all(input_dir, tables_dir, extractor, config).await?;
    let synthesized = synthesize_all(tables_dir, digests_dir, synthesizer, config).await?;
    Ok((extracted, synthesized))
}
