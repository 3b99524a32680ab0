//! End-to-end tests for both stages with in-process fakes.
//!
//! pdfium, tesseract and the model are replaced by fakes behind the library's
//! traits, and every wait goes through a recording sleeper, so these tests
//! run offline and without real delays.

use async_trait::async_trait;
use image::DynamicImage;
use invoice_digest::{
    extract_all, run_all, synthesize_all, Credential, DigestError, Extractor, InferenceError,
    InferenceService, ItemError, OcrEngine, PageTable, PipelineConfig, Rasterizer, RetryPolicy,
    RetryingClient, Sleeper, Stage, Synthesizer,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const HEADER: &str =
    "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

// ── Fakes ───────────────────────────────────────────────────────────────────

/// Reads `%PDF pages=N` from the file and returns N blank images whose width
/// encodes the page count. A file containing `broken` fails to render.
struct FakeRasterizer;

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(&self, path: &Path) -> Result<Vec<DynamicImage>, ItemError> {
        let body = std::fs::read_to_string(path).map_err(|e| ItemError::ReadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        if body.contains("broken") {
            return Err(ItemError::RasterisationFailed {
                page: 1,
                detail: "corrupt xref table".into(),
            });
        }
        let pages: u32 = body
            .split("pages=")
            .nth(1)
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(1);
        Ok((0..pages).map(|_| DynamicImage::new_rgb8(pages, 1)).collect())
    }
}

/// Two words per page, tagged with the page number.
struct FakeOcr;

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize(&self, page_num: usize, _image: DynamicImage) -> Result<PageTable, ItemError> {
        Ok(PageTable::new(
            page_num,
            format!(
                "{HEADER}\n5\t{page_num}\t1\t1\t1\t1\t10\t10\t50\t12\t96\tInvoice\n\
                 5\t{page_num}\t1\t1\t1\t2\t70\t10\t40\t12\t95\tp{page_num}\n"
            ),
        ))
    }
}

/// Answers with a fenced digest built from the table, after failing the
/// first `quota_failures` calls with a rate-limit error. Prompts containing
/// `POISON` get a permanent error.
struct FakeModel {
    calls: AtomicUsize,
    quota_failures: usize,
}

impl FakeModel {
    fn new(quota_failures: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            quota_failures,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceService for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.quota_failures {
            return Err(InferenceError::RateLimited {
                provider: "fake".into(),
                detail: "429 RESOURCE_EXHAUSTED".into(),
            });
        }
        if prompt.contains("POISON") {
            return Err(InferenceError::Service {
                provider: "fake".into(),
                detail: "400 invalid argument".into(),
            });
        }
        let rows = prompt.lines().filter(|l| l.starts_with("5\t")).count();
        Ok(format!(
            "```json\n{{\"invoice_number\": \"INV-{rows}\", \"invoice_date\": \"2024-03-01\", \
             \"total_amount\": \"1,250.50\", \"line_items\": [{{\"description\": \"Transport Łódź → Kraków\", \
             \"quantity\": 2, \"unit_price\": 625.25, \"total_price\": 1250.5}}]}}\n```"
        ))
    }
}

#[derive(Default)]
struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn waits(&self) -> Vec<u64> {
        self.waits.lock().unwrap().iter().map(|d| d.as_secs()).collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("invoice_digest=debug")
        .with_test_writer()
        .try_init();
}

fn extractor() -> Extractor {
    Extractor::new(Arc::new(FakeRasterizer), Arc::new(FakeOcr))
}

fn synthesizer(model: Arc<FakeModel>, sleeper: Arc<RecordingSleeper>) -> Synthesizer {
    let client = RetryingClient::new(model, RetryPolicy::default());
    Synthesizer::new(client).with_sleeper(sleeper)
}

fn config() -> PipelineConfig {
    PipelineConfig::builder().build().unwrap()
}

fn write(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).unwrap();
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Stage 1 ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn multi_page_document_merges_under_one_header() {
    init_tracing();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "inv.pdf", "%PDF pages=3");

    let report = assert_ok!(extract_all(input.path(), output.path(), &extractor(), &config()).await);
    assert_eq!(report.stage, Stage::Extract);
    assert!(report.is_complete_success());

    let table = std::fs::read_to_string(output.path().join("inv.tsv")).unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines.iter().filter(|l| **l == HEADER).count(), 1);
    // 1 header + 2 rows for each of the 3 pages, in page order.
    assert_eq!(lines.len(), 7);
    let pages: Vec<&str> = lines[1..].iter().map(|l| l.split('\t').nth(1).unwrap()).collect();
    assert_eq!(pages, vec!["1", "1", "2", "2", "3", "3"]);
    assert!(lines[6].ends_with("\tp3"));
}

#[tokio::test]
async fn failing_document_does_not_stop_the_batch() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "a.pdf", "%PDF pages=1");
    write(input.path(), "b.pdf", "%PDF broken");
    write(input.path(), "c.pdf", "%PDF pages=2");
    write(input.path(), "notes.txt", "ignored");

    let report = assert_ok!(extract_all(input.path(), output.path(), &extractor(), &config()).await);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].input.ends_with("b.pdf"));
    assert!(matches!(
        report.failures[0].error,
        ItemError::RasterisationFailed { .. }
    ));
    assert_eq!(sorted_names(output.path()), vec!["a.tsv", "c.tsv"]);
}

#[tokio::test]
async fn mislabelled_file_is_a_per_document_failure() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "scan.pdf", "PK\u{3}\u{4} not a pdf");
    write(input.path(), "real.pdf", "%PDF pages=1");

    let report = assert_ok!(extract_all(input.path(), output.path(), &extractor(), &config()).await);
    assert_eq!(report.succeeded(), 1);
    assert!(matches!(report.failures[0].error, ItemError::NotAPdf { .. }));
}

#[tokio::test]
async fn rerun_overwrites_with_identical_output() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "inv.pdf", "%PDF pages=2");

    assert_ok!(extract_all(input.path(), output.path(), &extractor(), &config()).await);
    let first = std::fs::read(output.path().join("inv.tsv")).unwrap();
    assert_ok!(extract_all(input.path(), output.path(), &extractor(), &config()).await);
    let second = std::fs::read(output.path().join("inv.tsv")).unwrap();

    assert_eq!(first, second);
    assert_eq!(sorted_names(output.path()), vec!["inv.tsv"]);
}

#[tokio::test]
async fn empty_input_dir_yields_empty_report() {
    let input = tempfile::tempdir().unwrap();
    let output = input.path().join("never-created");

    let report = assert_ok!(extract_all(input.path(), &output, &extractor(), &config()).await);
    assert_eq!(report.attempted, 0);
    assert!(report.outputs.is_empty());
    assert!(!output.exists());
}

#[tokio::test]
async fn missing_input_dir_is_fatal() {
    let output = tempfile::tempdir().unwrap();
    let err = assert_err!(
        extract_all(Path::new("/no/such/invoices"), output.path(), &extractor(), &config()).await
    );
    assert!(matches!(err, DigestError::InputDirUnreadable { .. }));
}

// ── Stage 2 ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tables_become_digests_with_pacing_between_documents() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["a.tsv", "b.tsv", "c.tsv"] {
        write(
            input.path(),
            name,
            &format!("{HEADER}\n5\t1\t1\t1\t1\t1\t10\t10\t50\t12\t96\tTotal"),
        );
    }

    let model = FakeModel::new(0);
    let sleeper = Arc::new(RecordingSleeper::default());
    let synth = synthesizer(Arc::clone(&model), Arc::clone(&sleeper));

    let report = assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);
    assert_eq!(report.stage, Stage::Synthesize);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(model.calls(), 3);
    // Pacing between items only, never after the last one.
    assert_eq!(sleeper.waits(), vec![5, 5]);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.path().join("b.json")).unwrap())
            .unwrap();
    assert_eq!(json["invoice_number"], "INV-1");
    assert_eq!(json["due_date"], "");
    assert_eq!(json["total_amount"], 1250.5);
    assert_eq!(json["line_items"][0]["quantity"], 2.0);
}

#[tokio::test]
async fn quota_errors_back_off_then_succeed() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "only.tsv", HEADER);

    let model = FakeModel::new(2);
    let sleeper = Arc::new(RecordingSleeper::default());
    let synth = synthesizer(Arc::clone(&model), Arc::clone(&sleeper));

    let report = assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);
    assert!(report.is_complete_success());
    assert_eq!(model.calls(), 3);
    assert_eq!(sleeper.waits(), vec![5, 10]);
}

#[tokio::test]
async fn exhausted_document_is_recorded_and_the_batch_continues() {
    init_tracing();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "a.tsv", HEADER);
    write(input.path(), "b.tsv", HEADER);

    // Five quota errors use up every attempt of the first document.
    let model = FakeModel::new(5);
    let sleeper = Arc::new(RecordingSleeper::default());
    let synth = synthesizer(Arc::clone(&model), Arc::clone(&sleeper));

    let report = assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded(), 1);
    match &report.failures[0].error {
        ItemError::Inference(InferenceError::RetriesExhausted { attempts, .. }) => {
            assert_eq!(*attempts, 5)
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert_eq!(model.calls(), 6);
    // Backoff for a.tsv, one pacing wait, nothing for b.tsv.
    assert_eq!(sleeper.waits(), vec![5, 10, 20, 40, 5]);
    assert_eq!(sorted_names(output.path()), vec!["b.json"]);
}

#[tokio::test]
async fn permanent_error_is_not_retried() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "bad.tsv", &format!("{HEADER}\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t90\tPOISON"));

    let model = FakeModel::new(0);
    let sleeper = Arc::new(RecordingSleeper::default());
    let synth = synthesizer(Arc::clone(&model), Arc::clone(&sleeper));

    let report = assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);
    assert_eq!(report.succeeded(), 0);
    assert_eq!(model.calls(), 1);
    assert!(sleeper.waits().is_empty());
    assert!(matches!(
        report.failures[0].error,
        ItemError::Inference(InferenceError::Service { .. })
    ));
}

#[tokio::test]
async fn both_stages_chain_through_the_filesystem() {
    let invoices = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let tables = work.path().join("extract");
    let digests = work.path().join("synthesis");
    write(invoices.path(), "march.pdf", "%PDF pages=2");

    let config = config();
    let extracted = assert_ok!(extract_all(invoices.path(), &tables, &extractor(), &config).await);
    assert_eq!(extracted.outputs, vec![tables.join("march.tsv")]);

    let model = FakeModel::new(0);
    let synth = synthesizer(model, Arc::new(RecordingSleeper::default()));
    let digested = assert_ok!(synthesize_all(&tables, &digests, &synth, &config).await);
    assert_eq!(digested.outputs, vec![digests.join("march.json")]);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(digests.join("march.json")).unwrap())
            .unwrap();
    // 2 pages × 2 rows reached the model.
    assert_eq!(json["invoice_number"], "INV-4");
}

#[tokio::test]
async fn synthesis_rerun_overwrites_with_identical_output() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "inv.tsv", &format!("{HEADER}\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t90\tTotal"));

    let synth = synthesizer(FakeModel::new(0), Arc::new(RecordingSleeper::default()));
    assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);
    let first = std::fs::read(output.path().join("inv.json")).unwrap();
    assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);
    let second = std::fs::read(output.path().join("inv.json")).unwrap();

    assert_eq!(first, second);
    assert_eq!(sorted_names(output.path()), vec!["inv.json"]);
}

#[tokio::test]
async fn written_digest_keeps_non_ascii_text_verbatim() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write(input.path(), "pl.tsv", HEADER);

    let synth = synthesizer(FakeModel::new(0), Arc::new(RecordingSleeper::default()));
    assert_ok!(synthesize_all(input.path(), output.path(), &synth, &config()).await);

    let raw = std::fs::read_to_string(output.path().join("pl.json")).unwrap();
    assert!(raw.contains("Transport Łódź → Kraków"), "{raw}");
    assert!(!raw.contains("\\u"), "{raw}");
}

#[tokio::test]
async fn run_over_empty_invoice_dir_yields_two_empty_reports() {
    let invoices = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let tables = work.path().join("extract");
    let digests = work.path().join("synthesis");

    let model = FakeModel::new(0);
    let synth = synthesizer(Arc::clone(&model), Arc::new(RecordingSleeper::default()));
    let (extracted, synthesized) = assert_ok!(
        run_all(invoices.path(), &tables, &digests, &extractor(), &synth, &config()).await
    );

    assert_eq!(extracted.stage, Stage::Extract);
    assert_eq!(extracted.attempted, 0);
    assert_eq!(synthesized.stage, Stage::Synthesize);
    assert_eq!(synthesized.attempted, 0);
    assert_eq!(model.calls(), 0);
    assert!(tables.is_dir());
}

#[tokio::test]
async fn run_chains_both_stages() {
    let invoices = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let tables = work.path().join("extract");
    let digests = work.path().join("synthesis");
    write(invoices.path(), "a.pdf", "%PDF pages=1");
    write(invoices.path(), "b.pdf", "%PDF broken");

    let synth = synthesizer(FakeModel::new(0), Arc::new(RecordingSleeper::default()));
    let (extracted, synthesized) = assert_ok!(
        run_all(invoices.path(), &tables, &digests, &extractor(), &synth, &config()).await
    );

    assert_eq!((extracted.attempted, extracted.succeeded()), (2, 1));
    assert_eq!((synthesized.attempted, synthesized.succeeded()), (1, 1));
    assert_eq!(sorted_names(&digests), vec!["a.json"]);
}

#[test]
fn gemini_without_credential_refuses_to_start() {
    let config = PipelineConfig::builder().model("gemini-2.5-flash").build().unwrap();
    let err = Synthesizer::from_config(&config).err().unwrap();
    assert!(matches!(err, DigestError::MissingCredential { .. }));

    let config = PipelineConfig::builder()
        .credential(Credential::new("k"))
        .build()
        .unwrap();
    assert!(Synthesizer::from_config(&config).is_ok());
}
