//! CLI binary for invoice-digest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one or both stages and prints a summary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use invoice_digest::config::CREDENTIAL_ENV_KEY;
use invoice_digest::{
    extract_all, run_all, synthesize_all, BatchProgressCallback, BatchReport, Credential, Extractor,
    PipelineConfig, ProgressCallback, Stage, Synthesizer,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per batch; per-file lines are printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self { bar })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, stage: Stage, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.reset();
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(stage.label());
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{}: {total} file(s)", stage.label()))
        ));
    }

    fn on_item_start(&self, _index: usize, _total: usize, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, output: &Path) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            green("✓"),
            index,
            total,
            dim(&output.display().to_string()),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let msg: String = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            bold(name),
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _stage: Stage, _attempted: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Stage 1: OCR every PDF in ./invoices into ./.poc/extract/*.tsv
  invoice-digest extract

  # Stage 2: turn every table into ./.poc/synthesis/*.json
  GEMINI_API_KEY=... invoice-digest synthesize

  # Both stages, custom directories
  invoice-digest run --input-dir scans --tables-dir out/tsv --digests-dir out/json

  # Another provider through edgequake-llm
  invoice-digest synthesize --provider openai --model gpt-4.1-mini

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Gemini API key (also read from ./.env)
  OPENAI_API_KEY, …       Keys for --provider backends
  RUST_LOG                Overrides the log filter
"#;

/// Extract structured invoice data from scanned PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-digest",
    version,
    about = "Extract structured invoice data from scanned PDFs with OCR and an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INVOICE_DIGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "INVOICE_DIGEST_QUIET")]
    quiet: bool,

    /// Disable the progress bar (plain log lines instead).
    #[arg(long, global = true, env = "INVOICE_DIGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Print the batch report(s) as JSON on stdout.
    #[arg(long, global = true, env = "INVOICE_DIGEST_JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage 1: PDFs → OCR tables (<stem>.tsv).
    Extract {
        /// Directory of PDF invoices.
        #[arg(long, env = "INVOICE_DIGEST_INPUT_DIR", default_value = "invoices")]
        input_dir: PathBuf,

        /// Directory for the TSV tables.
        #[arg(long, env = "INVOICE_DIGEST_TABLES_DIR", default_value = ".poc/extract")]
        output_dir: PathBuf,

        #[command(flatten)]
        ocr: OcrArgs,
    },

    /// Stage 2: OCR tables → digests (<stem>.json).
    Synthesize {
        /// Directory of TSV tables.
        #[arg(long, env = "INVOICE_DIGEST_TABLES_DIR", default_value = ".poc/extract")]
        input_dir: PathBuf,

        /// Directory for the JSON digests.
        #[arg(long, env = "INVOICE_DIGEST_DIGESTS_DIR", default_value = ".poc/synthesis")]
        output_dir: PathBuf,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Both stages back to back.
    Run {
        /// Directory of PDF invoices.
        #[arg(long, env = "INVOICE_DIGEST_INPUT_DIR", default_value = "invoices")]
        input_dir: PathBuf,

        /// Directory for the TSV tables.
        #[arg(long, env = "INVOICE_DIGEST_TABLES_DIR", default_value = ".poc/extract")]
        tables_dir: PathBuf,

        /// Directory for the JSON digests.
        #[arg(long, env = "INVOICE_DIGEST_DIGESTS_DIR", default_value = ".poc/synthesis")]
        digests_dir: PathBuf,

        #[command(flatten)]
        ocr: OcrArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct OcrArgs {
    /// Tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, env = "INVOICE_DIGEST_OCR_LANG", default_value = "eng")]
    lang: String,

    /// Tesseract executable.
    #[arg(long, env = "INVOICE_DIGEST_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Longest edge of a rendered page in pixels.
    #[arg(long, env = "INVOICE_DIGEST_MAX_PIXELS", default_value_t = 2400)]
    max_pixels: u32,

    /// Path to libpdfium; defaults to ./ then the system library path.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct LlmArgs {
    /// Model ID.
    #[arg(long, env = "INVOICE_DIGEST_MODEL", default_value = invoice_digest::config::DEFAULT_MODEL)]
    model: String,

    /// Provider: gemini (built-in) or any edgequake-llm provider (openai, anthropic, ollama, …).
    #[arg(long, env = "INVOICE_DIGEST_PROVIDER")]
    provider: Option<String>,

    /// Maximum attempts per document on quota errors.
    #[arg(long, env = "INVOICE_DIGEST_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// First backoff wait in seconds (doubles on each quota error).
    #[arg(long, env = "INVOICE_DIGEST_BACKOFF_SECS", default_value_t = 5)]
    backoff_secs: u64,

    /// Wait between two documents in seconds.
    #[arg(long, env = "INVOICE_DIGEST_PACING_SECS", default_value_t = 5)]
    pacing_secs: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INVOICE_DIGEST_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per response.
    #[arg(long, env = "INVOICE_DIGEST_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Per-request timeout in seconds.
    #[arg(long, env = "INVOICE_DIGEST_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Text file replacing the built-in extraction prompt.
    #[arg(long, env = "INVOICE_DIGEST_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level per-file lines when it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let mut reports = Vec::new();
    match &cli.command {
        Command::Extract {
            input_dir,
            output_dir,
            ocr,
        } => {
            let config = build_config(Some(ocr), None, progress).await?;
            let extractor = Extractor::from_config(&config);
            let report = extract_all(input_dir, output_dir, &extractor, &config)
                .await
                .context("Extraction failed")?;
            reports.push(report);
        }
        Command::Synthesize {
            input_dir,
            output_dir,
            llm,
        } => {
            let config = build_config(None, Some(llm), progress).await?;
            let synthesizer = Synthesizer::from_config(&config).context("Cannot start synthesis")?;
            let report = synthesize_all(input_dir, output_dir, &synthesizer, &config)
                .await
                .context("Synthesis failed")?;
            reports.push(report);
        }
        Command::Run {
            input_dir,
            tables_dir,
            digests_dir,
            ocr,
            llm,
        } => {
            let config = build_config(Some(ocr), Some(llm), progress).await?;
            // Fail on a missing credential before spending time on OCR.
            let synthesizer = Synthesizer::from_config(&config).context("Cannot start synthesis")?;
            let extractor = Extractor::from_config(&config);

            let (extracted, synthesized) = run_all(
                input_dir,
                tables_dir,
                digests_dir,
                &extractor,
                &synthesizer,
                &config,
            )
            .await
            .context("Pipeline failed")?;
            reports.push(extracted);
            reports.push(synthesized);
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        for report in &reports {
            print_summary(report);
        }
    }

    Ok(())
}

/// One summary line per batch plus one line per failed file.
fn print_summary(report: &BatchReport) {
    if report.attempted == 0 {
        eprintln!("{} {}: no input files found", cyan("⚠"), report.stage.label());
        return;
    }
    let mark = if report.is_complete_success() {
        green("✔")
    } else if report.succeeded() == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{} {} complete. {}/{} file(s) processed  {}",
        mark,
        report.stage.label(),
        bold(&report.succeeded().to_string()),
        report.attempted,
        dim(&format!("{}ms", report.duration_ms)),
    );
    for failure in &report.failures {
        eprintln!(
            "   {} {}: {}",
            red("✗"),
            failure.input.display(),
            failure.error
        );
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    ocr: Option<&OcrArgs>,
    llm: Option<&LlmArgs>,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder();

    if let Some(ocr) = ocr {
        builder = builder
            .ocr_language(&ocr.lang)
            .tesseract_path(&ocr.tesseract)
            .max_rendered_pixels(ocr.max_pixels);
        if let Some(ref lib) = ocr.pdfium_lib {
            builder = builder.pdfium_lib_path(lib);
        }
    }

    if let Some(llm) = llm {
        builder = builder
            .model(&llm.model)
            .max_retries(llm.max_retries)
            .retry_base_delay(Duration::from_secs(llm.backoff_secs))
            .pacing_delay(Duration::from_secs(llm.pacing_secs))
            .temperature(llm.temperature)
            .max_tokens(llm.max_tokens)
            .api_timeout_secs(llm.api_timeout);
        if let Some(ref provider) = llm.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(ref path) = llm.prompt_file {
            let prompt = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?;
            builder = builder.prompt(prompt);
        }
        // A missing key only matters for the Gemini client; Synthesizer
        // reports it as a configuration error before any work starts.
        if let Ok(credential) = Credential::from_env(CREDENTIAL_ENV_KEY) {
            builder = builder.credential(credential);
        }
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
