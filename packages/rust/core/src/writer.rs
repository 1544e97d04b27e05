//! Container writers.
//!
//! [`ContainerWriter`] is the seam between assembly and serialization. The
//! bundled [`JsonBundleWriter`] lays a document out on disk as:
//!
//! ```text
//! <out_dir>/<document id>/
//! ├── document.json        manifest: chapters, blocks, nav, warnings, digests
//! ├── chapter_001.xhtml
//! ├── ...
//! └── images/...           resource bytes at their container paths
//! ```
//!
//! Every file is written to a temp sibling first, then renamed into place.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use fixturesmith_shared::{
    FixtureError, NavDecision, NavNode, ReferenceBlock, ResolvedReference, Result,
};

use crate::assembler::AssembledDocument;

/// Name of the manifest written by [`JsonBundleWriter`].
pub const MANIFEST_FILE: &str = "document.json";

/// Serializes an assembled document into some container format.
pub trait ContainerWriter: Send + Sync {
    /// Write `doc` below `out_dir` and return the path of what was written.
    ///
    /// Every failure is reported as [`FixtureError::Writer`].
    fn write(&self, doc: &AssembledDocument, out_dir: &Path) -> Result<PathBuf>;
}

/// Writes a directory bundle with a JSON manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBundleWriter;

/// Checksummed file inside a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub path: String,
    pub media_type: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// Chapter entry in `document.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterMeta<'a> {
    pub index: u32,
    pub title: &'a str,
    pub file: FileMeta,
    pub references: &'a [ResolvedReference],
    pub blocks: &'a [ReferenceBlock],
}

/// Contents of `document.json`.
#[derive(Debug, Clone, Serialize)]
pub struct BundleManifest<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub language: &'a str,
    pub format_version: u32,
    pub generated_at: DateTime<Utc>,
    pub chapters: Vec<ChapterMeta<'a>>,
    pub resources: Vec<FileMeta>,
    pub nav: &'a NavNode,
    pub nav_decision: NavDecision,
    pub warnings: Vec<String>,
}

impl ContainerWriter for JsonBundleWriter {
    #[instrument(skip_all, fields(id = %doc.id, out_dir = %out_dir.display()))]
    fn write(&self, doc: &AssembledDocument, out_dir: &Path) -> Result<PathBuf> {
        let bundle = safe_join(out_dir, &doc.id)?;
        std::fs::create_dir_all(&bundle).map_err(|e| io_error(&bundle, e))?;

        let mut chapters = Vec::with_capacity(doc.chapters.len());
        for chapter in &doc.chapters {
            let xhtml = chapter.xhtml(&doc.language);
            let file = write_file(&bundle, &chapter.file_name, xhtml.as_bytes())?;
            chapters.push(ChapterMeta {
                index: chapter.index,
                title: &chapter.title,
                file: FileMeta {
                    media_type: "application/xhtml+xml".into(),
                    ..file
                },
                references: &chapter.references,
                blocks: &chapter.blocks,
            });
        }

        let mut resources = Vec::with_capacity(doc.resources.len());
        for entry in &doc.resources {
            let file = write_file(&bundle, &entry.container_path, &entry.bytes)?;
            resources.push(FileMeta {
                media_type: entry.media_type.clone(),
                sha256: entry.sha256(),
                ..file
            });
        }

        let manifest = BundleManifest {
            id: &doc.id,
            title: &doc.title,
            language: &doc.language,
            format_version: doc.format_version,
            generated_at: Utc::now(),
            chapters,
            resources,
            nav: &doc.nav,
            nav_decision: doc.nav_decision,
            warnings: doc.warnings.iter().map(ToString::to_string).collect(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| FixtureError::writer(format!("JSON serialization failed: {e}")))?;
        write_file(&bundle, MANIFEST_FILE, json.as_bytes())?;

        info!(
            path = %bundle.display(),
            chapters = doc.chapters.len(),
            resources = doc.resources.len(),
            "bundle written"
        );

        Ok(bundle)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Join a container-relative path onto `root`, refusing anything that could
/// escape it.
fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let mut joined = root.to_path_buf();
    let mut parts = 0;

    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FixtureError::writer(format!(
                    "refusing container path '{relative}'"
                )));
            }
        }
    }

    if parts == 0 {
        return Err(FixtureError::writer(format!(
            "empty container path '{relative}'"
        )));
    }
    Ok(joined)
}

/// Atomically write `bytes` to `root/relative` and describe the result.
fn write_file(root: &Path, relative: &str, bytes: &[u8]) -> Result<FileMeta> {
    let target = safe_join(root, relative)?;
    let parent = target
        .parent()
        .ok_or_else(|| FixtureError::writer(format!("no parent for '{relative}'")))?;
    std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;

    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FixtureError::writer(format!("invalid file name in '{relative}'")))?;
    let temp = parent.join(format!(".{name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| io_error(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| io_error(&target, e))?;

    debug!(file = relative, size = bytes.len(), "wrote file");

    Ok(FileMeta {
        path: relative.to_string(),
        media_type: String::new(),
        sha256: format!("{:x}", Sha256::digest(bytes)),
        size_bytes: bytes.len(),
    })
}

fn io_error(path: &Path, e: std::io::Error) -> FixtureError {
    FixtureError::writer(format!("{}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
