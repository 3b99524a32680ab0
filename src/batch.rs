//! The per-item loop shared by both stages.
//!
//! Walks the inputs in order, runs one stage step per input, turns every
//! [`ItemError`] into an [`ItemFailure`] instead of aborting, fires progress
//! events and, when pacing is set, waits between two consecutive items.

use crate::error::ItemError;
use crate::output::{BatchReport, ItemFailure, Stage};
use crate::pipeline::input::display_name;
use crate::pipeline::retry::Sleeper;
use crate::progress::ProgressCallback;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Flat wait between consecutive items.
pub(crate) struct Pacing<'a> {
    pub delay: Duration,
    pub sleeper: &'a dyn Sleeper,
}

pub(crate) async fn run_batch<F, Fut>(
    stage: Stage,
    inputs: Vec<PathBuf>,
    progress: Option<&ProgressCallback>,
    pacing: Option<Pacing<'_>>,
    mut process: F,
) -> BatchReport
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = Result<PathBuf, ItemError>>,
{
    let start = Instant::now();
    let total = inputs.len();
    let mut report = BatchReport::empty(stage);

    if let Some(cb) = progress {
        cb.on_batch_start(stage, total);
    }

    for (i, input) in inputs.into_iter().enumerate() {
        let index = i + 1;
        let name = display_name(&input);
        info!("Processing: {}", name);
        if let Some(cb) = progress {
            cb.on_item_start(index, total, &name);
        }

        report.attempted += 1;
        match process(input.clone()).await {
            Ok(output) => {
                info!("  -> Written to: {}", output.display());
                if let Some(cb) = progress {
                    cb.on_item_complete(index, total, &output);
                }
                report.outputs.push(output);
            }
            Err(e) => {
                // A progress callback already shows the failure to the user.
                match progress {
                    Some(cb) => {
                        info!("  -> Error processing {}: {}", name, e);
                        cb.on_item_error(index, total, &name, &e.to_string());
                    }
                    None => warn!("  -> Error processing {}: {}", name, e),
                }
                report.failures.push(ItemFailure { input, error: e });
            }
        }

        if let Some(ref p) = pacing {
            if index < total && !p.delay.is_zero() {
                info!("    Waiting {}s before next file...", p.delay.as_secs_f64());
                p.sleeper.sleep(p.delay).await;
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "{} complete. {}/{} file(s) processed.",
        stage.label(),
        report.succeeded(),
        report.attempted
    );
    if let Some(cb) = progress {
        cb.on_batch_complete(stage, report.attempted, report.succeeded());
    }
    report
}
