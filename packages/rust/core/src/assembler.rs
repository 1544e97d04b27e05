//! Document assembler.
//!
//! Runs plan → resolve every chapter → merge resources → navigation, and
//! returns an in-memory [`AssembledDocument`] ready for a container writer.
//! Nothing here touches the output directory.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use fixturesmith_shared::{
    BlockKind, Chapter, DocumentPlan, FixtureError, GeneratorSettings, MarkerKind, NavDecision,
    NavNode, ReferenceBlock, ResolvedReference, ResourceManifestEntry, Result, Warning,
};

use crate::nav;
use crate::planner::{escape_xml, plan_with};
use crate::xref::{CrossReferenceResolver, image_html};

/// A chapter after marker resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedChapter {
    pub index: u32,
    pub title: String,
    pub file_name: String,
    /// Body with markers rewritten; blocks are not yet appended.
    pub body: String,
    pub references: Vec<ResolvedReference>,
    pub blocks: Vec<ReferenceBlock>,
}

impl ResolvedChapter {
    /// Full XHTML for this chapter: body, then footnotes, then bibliography.
    pub fn xhtml(&self, language: &str) -> String {
        let mut out = String::with_capacity(self.body.len() + 512);
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!(
            "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" xml:lang=\"{lang}\" lang=\"{lang}\">\n",
            lang = escape_xml(language)
        ));
        out.push_str(&format!(
            "<head><title>{}</title></head>\n<body>\n",
            escape_xml(&self.title)
        ));
        out.push_str(&self.body);
        out.push('\n');

        let footnotes = self.blocks_of(BlockKind::Footnote);
        if !footnotes.is_empty() {
            out.push_str("<section class=\"footnotes\" epub:type=\"footnotes\">\n");
            for block in footnotes {
                out.push_str(&block.html);
                out.push('\n');
            }
            out.push_str("</section>\n");
        }

        let bibliography = self.blocks_of(BlockKind::Bibliography);
        if !bibliography.is_empty() {
            out.push_str("<section class=\"bibliography\" epub:type=\"bibliography\">\n");
            for block in bibliography {
                out.push_str(&block.html);
                out.push('\n');
            }
            out.push_str("</section>\n");
        }

        out.push_str("</body>\n</html>\n");
        out
    }

    fn blocks_of(&self, kind: BlockKind) -> Vec<&ReferenceBlock> {
        self.blocks.iter().filter(|b| b.kind == kind).collect()
    }
}

/// Everything a container writer needs for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledDocument {
    pub id: String,
    pub title: String,
    pub language: String,
    pub format_version: u32,
    pub chapters: Vec<ResolvedChapter>,
    /// Deduplicated by container path; first entry wins.
    pub resources: Vec<ResourceManifestEntry>,
    pub nav: NavNode,
    pub nav_decision: NavDecision,
    pub warnings: Vec<Warning>,
}

/// Plan and assemble one document.
///
/// `asset_root` overrides `payloads.assets_dir` as the base for relative
/// image paths. Assembly never fails; problems end up in `warnings`.
#[instrument(skip_all, fields(title = %settings.document.title))]
pub fn assemble<R: Rng + ?Sized>(
    settings: &GeneratorSettings,
    rng: &mut R,
    asset_root: Option<PathBuf>,
) -> AssembledDocument {
    let mut warnings = Vec::new();
    let plan = plan_with(&settings.document, &settings.payloads, rng, &mut warnings);
    let asset_root = asset_root.or_else(|| settings.payloads.assets_dir.clone());
    assemble_plan(plan, settings, &CrossReferenceResolver::new(asset_root), warnings)
}

/// Assemble an existing plan. `warnings` carries anything already collected
/// while planning.
pub fn assemble_plan(
    plan: DocumentPlan,
    settings: &GeneratorSettings,
    resolver: &CrossReferenceResolver,
    mut warnings: Vec<Warning>,
) -> AssembledDocument {
    let mut chapters = Vec::with_capacity(plan.chapters.len());
    let mut resources: Vec<ResourceManifestEntry> = Vec::new();
    // Container path -> position in `resources`.
    let mut resource_paths: HashMap<String, usize> = HashMap::new();

    for chapter in &plan.chapters {
        let mut resolution = resolver.resolve_chapter(
            &chapter.body,
            chapter.index,
            &chapter.notes,
            &chapter.citations,
            &chapter.images,
        );

        for entry in resolution.resources {
            match resource_paths.get(&entry.container_path) {
                None => {
                    resource_paths.insert(entry.container_path.clone(), resources.len());
                    resources.push(entry);
                }
                Some(&pos) if resources[pos].bytes == entry.bytes => {
                    debug!(path = %entry.container_path, "resource already in manifest, skipping");
                }
                Some(_) => {
                    unclaim_images(chapter, &entry, &mut resolution.body, &mut warnings);
                }
            }
        }
        warnings.extend(resolution.warnings);

        chapters.push(ResolvedChapter {
            index: chapter.index,
            title: chapter.title.clone(),
            file_name: chapter.file_name.clone(),
            body: resolution.body,
            references: resolution.references,
            blocks: resolution.blocks,
        });
    }

    let nav = nav::build_tree(&plan.chapters, &settings.navigation.toc_settings());
    let nav_decision = nav::decide_representations(
        settings.document.format_version,
        settings.navigation.legacy,
        settings.navigation.modern,
    );

    info!(
        id = %plan.id,
        chapters = chapters.len(),
        resources = resources.len(),
        warnings = warnings.len(),
        "document assembled"
    );

    AssembledDocument {
        id: plan.id,
        title: plan.title,
        language: plan.language,
        format_version: settings.document.format_version,
        chapters,
        resources,
        nav,
        nav_decision,
        warnings,
    }
}

/// `entry` wants a container path that already holds different bytes. Put
/// the chapter's markers for it back, so no `<img>` shows the wrong picture.
fn unclaim_images(
    chapter: &Chapter,
    entry: &ResourceManifestEntry,
    body: &mut String,
    warnings: &mut Vec<Warning>,
) {
    for (key, image) in &chapter.images {
        if image.target_filename != entry.container_path {
            continue;
        }
        *body = body.replace(&image_html(image), &MarkerKind::Image.token(key));
        warn!(
            chapter = chapter.index,
            key = %key,
            path = %entry.container_path,
            "container path already holds a different resource, leaving marker"
        );
        warnings.push(Warning::ResourceRead {
            chapter: chapter.index,
            key: key.clone(),
            path: image.path.clone(),
            reason: format!(
                "container path '{}' already holds a different resource",
                entry.container_path
            ),
        });
    }
}

/// Check the link guarantees of an assembled document.
///
/// - element ids are unique within each chapter
/// - every footnote links back to a reference whose link targets it, and
///   both ends are present in the output
/// - resource container paths are unique
/// - every navigation href points at a chapter file
pub fn verify(doc: &AssembledDocument) -> Result<()> {
    for chapter in &doc.chapters {
        let mut ids = HashSet::new();
        let block_ids = chapter.blocks.iter().map(|b| b.target_id.as_str());
        let ref_ids = chapter.references.iter().map(|r| r.ref_id.as_str());
        for id in block_ids.chain(ref_ids) {
            if !ids.insert(id) {
                return Err(FixtureError::Integrity(format!(
                    "{}: duplicate id '{id}'",
                    chapter.file_name
                )));
            }
        }

        for block in chapter.blocks.iter().filter(|b| b.kind == BlockKind::Footnote) {
            let backlink = block.backlink.as_deref().ok_or_else(|| {
                FixtureError::Integrity(format!(
                    "{}: footnote '{}' has no backlink",
                    chapter.file_name, block.target_id
                ))
            })?;
            let reference = chapter
                .references
                .iter()
                .find(|r| r.ref_id == backlink && r.target_id == block.target_id)
                .ok_or_else(|| {
                    FixtureError::Integrity(format!(
                        "{}: footnote '{}' backlinks to unknown reference '{backlink}'",
                        chapter.file_name, block.target_id
                    ))
                })?;

            let forward = format!("id=\"{}\"", reference.ref_id);
            let back = format!("href=\"#{}\"", reference.ref_id);
            if !chapter.body.contains(&forward) || !block.html.contains(&back) {
                return Err(FixtureError::Integrity(format!(
                    "{}: reference '{}' and its footnote do not link to each other",
                    chapter.file_name, reference.ref_id
                )));
            }
        }
    }

    let mut paths = HashSet::new();
    for entry in &doc.resources {
        if !paths.insert(entry.container_path.as_str()) {
            return Err(FixtureError::Integrity(format!(
                "resource '{}' appears twice",
                entry.container_path
            )));
        }
    }

    let files: HashSet<&str> = doc.chapters.iter().map(|c| c.file_name.as_str()).collect();
    verify_nav(&doc.nav, &files)
}

fn verify_nav(node: &NavNode, files: &HashSet<&str>) -> Result<()> {
    for child in &node.children {
        let file = child.href.split('#').next().unwrap_or_default();
        if !files.contains(file) {
            return Err(FixtureError::Integrity(format!(
                "navigation entry '{}' points at missing file '{file}'",
                child.title
            )));
        }
        verify_nav(child, files)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
