//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a batch walks its input directory. The CLI uses it to drive a
//! progress bar; library users can forward events anywhere they like.
//!
//! # Example
//!
//! ```rust
//! use invoice_digest::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl BatchProgressCallback for FailureCounter {
//!     fn on_item_error(&self, _index: usize, _total: usize, name: &str, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {error}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(FailureCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::path::Path;
use std::sync::Arc;

/// Called by the batch runners as they process each input.
///
/// All methods have no-op defaults so callers only override what they need.
/// `index` is 1-based.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after the inputs are listed and before the first item.
    fn on_batch_start(&self, stage: Stage, total: usize) {
        let _ = (stage, total);
    }

    /// Called just before an input is processed.
    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when an input produced its artifact.
    fn on_item_complete(&self, index: usize, total: usize, output: &Path) {
        let _ = (index, total, output);
    }

    /// Called when an input failed; the batch carries on.
    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every input has been attempted.
    fn on_batch_complete(&self, stage: Stage, attempted: usize, succeeded: usize) {
        let _ = (stage, attempted, succeeded);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
