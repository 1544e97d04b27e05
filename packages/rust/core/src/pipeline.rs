//! End-to-end `generate` pipeline: config → settings → assemble → write, for
//! a batch of seeds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use fixturesmith_shared::{
    ConfigLoader, DocumentPlan, FixtureError, GeneratorSettings, Result, Warning,
};

use crate::assembler::{self, AssembledDocument};
use crate::planner;
use crate::writer::ContainerWriter;

/// Configuration for [`generate_batch`].
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Per-run config file layered over the defaults.
    pub config_path: Option<PathBuf>,
    /// Source of the defaults layer.
    pub loader: ConfigLoader,
    /// Schema the merged config must satisfy, if any.
    pub schema: Option<Value>,
    /// Directory that receives one bundle per document.
    pub output_root: PathBuf,
    /// Seed of the first document; document `i` uses `seed + i`.
    pub seed: u64,
    /// Number of documents to generate.
    pub count: usize,
}

/// Settings ready for assembly.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: GeneratorSettings,
    /// `payloads.assets_dir`, resolved against the config file's directory.
    pub asset_root: Option<PathBuf>,
}

/// A document that was generated and written.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub id: String,
    pub path: PathBuf,
    pub chapters: usize,
    pub resources: usize,
    pub warnings: Vec<Warning>,
}

/// Result of one document in a batch.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub seed: u64,
    pub result: Result<GeneratedDocument>,
}

/// Result of [`generate_batch`].
#[derive(Debug)]
pub struct BatchResult {
    /// One outcome per document, in seed order.
    pub outcomes: Vec<DocumentOutcome>,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each document finishes, in seed order.
    fn document_done(&self, outcome: &DocumentOutcome, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &BatchResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_done(&self, _outcome: &DocumentOutcome, _current: usize, _total: usize) {}
    fn done(&self, _result: &BatchResult) {}
}

/// Load, validate and type the configuration.
///
/// Any error returned here belongs to the configuration class.
pub fn load_settings(
    config_path: Option<&Path>,
    loader: &ConfigLoader,
    schema: Option<&Value>,
) -> Result<LoadedSettings> {
    let merged = loader.load_and_validate(config_path, schema)?;
    let settings = GeneratorSettings::from_config(&merged)?;

    let asset_root = settings.payloads.assets_dir.as_ref().map(|dir| {
        match config_path.and_then(Path::parent) {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir.clone(),
        }
    });

    debug!(asset_root = ?asset_root, "settings loaded");
    Ok(LoadedSettings {
        settings,
        asset_root,
    })
}

/// Assemble one document from a fixed seed.
pub fn generate_document(loaded: &LoadedSettings, seed: u64) -> AssembledDocument {
    let mut rng = StdRng::seed_from_u64(seed);
    assembler::assemble(&loaded.settings, &mut rng, loaded.asset_root.clone())
}

/// Plan (without resolving) the document `generate_document` would build
/// for `seed`.
pub fn plan_document(loaded: &LoadedSettings, seed: u64) -> (DocumentPlan, Vec<Warning>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut warnings = Vec::new();
    let plan = planner::plan_with(
        &loaded.settings.document,
        &loaded.settings.payloads,
        &mut rng,
        &mut warnings,
    );
    (plan, warnings)
}

/// Check an assembled document's link guarantees, then hand it to `writer`.
/// A document that fails the check is never written.
pub fn finish_document(
    doc: AssembledDocument,
    writer: &dyn ContainerWriter,
    out_dir: &Path,
) -> Result<GeneratedDocument> {
    assembler::verify(&doc)?;
    let path = writer.write(&doc, out_dir)?;
    Ok(GeneratedDocument {
        id: doc.id,
        path,
        chapters: doc.chapters.len(),
        resources: doc.resources.len(),
        warnings: doc.warnings,
    })
}

/// Run the full `generate` pipeline.
///
/// 1. Load and validate configuration (fatal on error)
/// 2. Assemble, verify and write each document on a blocking task
///
/// A document that fails is reported in its outcome; the others still run.
#[instrument(skip_all, fields(count = config.count, seed = config.seed))]
pub async fn generate_batch(
    config: &GenerateConfig,
    writer: Arc<dyn ContainerWriter>,
    progress: &dyn ProgressReporter,
) -> Result<BatchResult> {
    let start = Instant::now();

    // --- Phase 1: Configuration ---
    progress.phase("Loading configuration");
    let loaded = Arc::new(load_settings(
        config.config_path.as_deref(),
        &config.loader,
        config.schema.as_ref(),
    )?);

    info!(
        count = config.count,
        output = %config.output_root.display(),
        "starting generate pipeline"
    );

    // --- Phase 2: Generation ---
    progress.phase("Generating documents");
    let handles: Vec<_> = (0..config.count)
        .map(|i| {
            let seed = config.seed.wrapping_add(i as u64);
            let loaded = Arc::clone(&loaded);
            let writer = Arc::clone(&writer);
            let out = config.output_root.clone();
            let handle = tokio::task::spawn_blocking(move || -> Result<GeneratedDocument> {
                finish_document(generate_document(&loaded, seed), writer.as_ref(), &out)
            });
            (seed, handle)
        })
        .collect();

    let total = handles.len();
    let mut outcomes = Vec::with_capacity(total);
    for (i, (seed, handle)) in handles.into_iter().enumerate() {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(FixtureError::writer(format!("generation task failed: {e}"))),
        };

        match &result {
            Ok(doc) => debug!(seed, id = %doc.id, warnings = doc.warnings.len(), "document generated"),
            Err(e) => warn!(seed, error = %e, "document failed"),
        }

        let outcome = DocumentOutcome { seed, result };
        progress.document_done(&outcome, i + 1, total);
        outcomes.push(outcome);
    }

    let result = BatchResult {
        outcomes,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        succeeded = result.succeeded(),
        failed = result.failed(),
        elapsed_ms = result.elapsed.as_millis(),
        "generate pipeline complete"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use fixturesmith_shared::document_schema;

    use crate::writer::{JsonBundleWriter, MANIFEST_FILE};

    const CONFIG: &str = r#"
[document]
title = "Batch"
chapters = 2
notes_per_chapter = 1
images_per_chapter = 1

[payloads]
assets_dir = "assets"
notes = ["A note."]
images = [{ path = "fig.png", alt_text = "Figure" }]
"#;

    fn workspace() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = tmp.path().join("fixture.toml");
        std::fs::write(&config, CONFIG).expect("config");
        std::fs::create_dir_all(tmp.path().join("assets")).expect("assets");
        std::fs::write(tmp.path().join("assets/fig.png"), b"png").expect("image");
        (tmp, config)
    }

    fn generate_config(root: &Path, config: PathBuf, count: usize) -> GenerateConfig {
        GenerateConfig {
            config_path: Some(config),
            loader: ConfigLoader::without_defaults(),
            schema: Some(document_schema()),
            output_root: root.join("out"),
            seed: 100,
            count,
        }
    }

    /// Records every callback.
    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.events.lock().unwrap().push(format!("phase:{name}"));
        }
        fn document_done(&self, outcome: &DocumentOutcome, current: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("doc:{}:{current}/{total}", outcome.seed));
        }
        fn done(&self, result: &BatchResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done:{}", result.succeeded()));
        }
    }

    /// Fails the first write it sees, delegates the rest.
    #[derive(Default)]
    struct FlakyWriter {
        calls: AtomicUsize,
    }

    impl ContainerWriter for FlakyWriter {
        fn write(&self, doc: &AssembledDocument, out_dir: &Path) -> Result<PathBuf> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(FixtureError::writer("disk full"));
            }
            JsonBundleWriter.write(doc, out_dir)
        }
    }

    struct PanickingWriter;

    impl ContainerWriter for PanickingWriter {
        fn write(&self, _doc: &AssembledDocument, _out_dir: &Path) -> Result<PathBuf> {
            panic!("writer exploded");
        }
    }

    #[test]
    fn asset_dir_resolves_against_config_file() {
        let (tmp, config) = workspace();
        let loaded = load_settings(Some(&config), &ConfigLoader::without_defaults(), None)
            .expect("settings");
        assert_eq!(loaded.asset_root, Some(tmp.path().join("assets")));
    }

    #[test]
    fn same_seed_same_document() {
        let (_tmp, config) = workspace();
        let loaded = load_settings(Some(&config), &ConfigLoader::without_defaults(), None)
            .expect("settings");
        assert_eq!(generate_document(&loaded, 9), generate_document(&loaded, 9));
        assert_ne!(generate_document(&loaded, 9).id, generate_document(&loaded, 10).id);
    }

    #[test]
    fn plan_matches_generated_document() {
        let (_tmp, config) = workspace();
        let loaded = load_settings(Some(&config), &ConfigLoader::without_defaults(), None)
            .expect("settings");
        let (plan, warnings) = plan_document(&loaded, 5);
        let doc = generate_document(&loaded, 5);
        assert_eq!(plan.id, doc.id);
        assert_eq!(plan.chapters.len(), doc.chapters.len());
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn batch_writes_one_bundle_per_seed() {
        let (tmp, config) = workspace();
        let cfg = generate_config(tmp.path(), config, 3);
        let progress = RecordingProgress::default();

        let result = generate_batch(&cfg, Arc::new(JsonBundleWriter), &progress)
            .await
            .expect("batch");

        assert_eq!(result.succeeded(), 3);
        let seeds: Vec<u64> = result.outcomes.iter().map(|o| o.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);

        for outcome in &result.outcomes {
            let doc = outcome.result.as_ref().expect("ok");
            assert!(doc.path.join(MANIFEST_FILE).is_file());
            assert_eq!(doc.chapters, 2);
            assert_eq!(doc.resources, 2);
            assert!(doc.warnings.is_empty(), "{:?}", doc.warnings);
        }

        let events = progress.events.lock().unwrap();
        assert_eq!(events.first().map(String::as_str), Some("phase:Loading configuration"));
        assert!(events.contains(&"doc:101:2/3".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("done:3"));
    }

    #[tokio::test]
    async fn batch_is_reproducible() {
        let (tmp, config) = workspace();
        let cfg = generate_config(tmp.path(), config, 2);
        let a = generate_batch(&cfg, Arc::new(JsonBundleWriter), &SilentProgress)
            .await
            .expect("first");
        let b = generate_batch(&cfg, Arc::new(JsonBundleWriter), &SilentProgress)
            .await
            .expect("second");

        let ids = |r: &BatchResult| -> Vec<String> {
            r.outcomes
                .iter()
                .filter_map(|o| o.result.as_ref().ok().map(|d| d.id.clone()))
                .collect()
        };
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(ids(&a).len(), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_siblings() {
        let (tmp, config) = workspace();
        let cfg = generate_config(tmp.path(), config, 4);
        let result = generate_batch(&cfg, Arc::new(FlakyWriter::default()), &SilentProgress)
            .await
            .expect("batch");

        assert_eq!(result.outcomes.len(), 4);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.succeeded(), 3);
    }

    #[test]
    fn broken_document_fails_alone_and_is_never_written() {
        let (tmp, config) = workspace();
        let loaded = load_settings(Some(&config), &ConfigLoader::without_defaults(), None)
            .expect("settings");
        let out = tmp.path().join("out");

        let mut broken = generate_document(&loaded, 1);
        let footnote = broken.chapters[0]
            .blocks
            .iter_mut()
            .find(|b| b.kind == fixturesmith_shared::BlockKind::Footnote)
            .expect("footnote block");
        footnote.backlink = Some("noteref-nowhere".into());
        let broken_id = broken.id.clone();

        let docs = vec![generate_document(&loaded, 0), broken, generate_document(&loaded, 2)];
        let results: Vec<_> = docs
            .into_iter()
            .map(|doc| finish_document(doc, &JsonBundleWriter, &out))
            .collect();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FixtureError::Integrity(_))));
        assert!(results[2].is_ok());
        assert!(!out.join(&broken_id).exists());
    }

    #[tokio::test]
    async fn panicking_writer_becomes_writer_error() {
        let (tmp, config) = workspace();
        let cfg = generate_config(tmp.path(), config, 2);
        let result = generate_batch(&cfg, Arc::new(PanickingWriter), &SilentProgress)
            .await
            .expect("batch");

        assert_eq!(result.failed(), 2);
        for outcome in &result.outcomes {
            assert!(matches!(outcome.result, Err(FixtureError::Writer(_))));
        }
    }

    #[tokio::test]
    async fn config_errors_abort_before_generation() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cfg = generate_config(tmp.path(), tmp.path().join("missing.toml"), 2);
        let err = generate_batch(&cfg, Arc::new(JsonBundleWriter), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn both_nav_flags_off_is_a_config_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = tmp.path().join("fixture.toml");
        std::fs::write(
            &config,
            "[document]\ntitle = \"x\"\n[navigation]\nlegacy = false\nmodern = false\n",
        )
        .expect("config");

        let cfg = generate_config(tmp.path(), config, 1);
        let err = generate_batch(&cfg, Arc::new(JsonBundleWriter), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("both false"));
    }
}
