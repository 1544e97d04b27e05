//! Cross-reference resolution for chapter bodies.
//!
//! A body is first split into [`BodyNode`]s (literal text and `[kind:key]`
//! markers), then rewritten in a single left-to-right pass:
//!
//! - **notes** become numbered forward links plus one footnote block per
//!   distinct key, each block linking back to its reference
//! - **citations** are replaced by their in-text string, with an optional
//!   bibliography block per distinct key
//! - **images** are read from disk, added to the resource manifest, and
//!   replaced by an `<img>` element
//!
//! Anything that cannot be resolved stays in the text verbatim and is
//! reported as a [`Warning`].
//!
//! A note key seen again in the same chapter reuses the first resolution: it
//! links to the same footnote with the same number and creates no new block.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use fixturesmith_shared::{
    BlockKind, CitationPayload, ImagePayload, MarkerKind, ReferenceBlock, ResolvedReference,
    ResourceManifestEntry, Warning,
};

use crate::planner::escape_xml;

// ---------------------------------------------------------------------------
// Body AST
// ---------------------------------------------------------------------------

/// One piece of a chapter body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyNode<'a> {
    /// Literal text, copied through unchanged.
    Text(&'a str),
    /// A marker of a known kind.
    Marker {
        kind: MarkerKind,
        key: &'a str,
        raw: &'a str,
    },
    /// Marker syntax with a kind nothing resolves.
    UnknownMarker { kind: &'a str, raw: &'a str },
}

/// Split `body` into text and marker nodes. Concatenating the raw text of the
/// nodes reproduces `body` exactly.
pub fn parse_body(body: &str) -> Vec<BodyNode<'_>> {
    static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[([A-Za-z][A-Za-z0-9_-]*):([^\[\]\s]+)\]").expect("valid regex")
    });

    let mut nodes = Vec::new();
    let mut last = 0;

    for caps in MARKER_RE.captures_iter(body) {
        let (Some(whole), Some(kind), Some(key)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if whole.start() > last {
            nodes.push(BodyNode::Text(&body[last..whole.start()]));
        }
        let raw = whole.as_str();
        nodes.push(match MarkerKind::parse(kind.as_str()) {
            Some(kind) => BodyNode::Marker {
                kind,
                key: key.as_str(),
                raw,
            },
            None => BodyNode::UnknownMarker {
                kind: kind.as_str(),
                raw,
            },
        });
        last = whole.end();
    }

    if last < body.len() {
        nodes.push(BodyNode::Text(&body[last..]));
    }

    nodes
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Output of resolving one chapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterResolution {
    /// Body with every resolvable marker rewritten.
    pub body: String,
    /// One entry per distinct note key, in first-seen order.
    pub references: Vec<ResolvedReference>,
    /// Footnote and bibliography blocks, in first-seen order.
    pub blocks: Vec<ReferenceBlock>,
    /// Images read for this chapter.
    pub resources: Vec<ResourceManifestEntry>,
    pub warnings: Vec<Warning>,
}

/// Resolves markers against per-chapter payload maps.
#[derive(Debug, Clone, Default)]
pub struct CrossReferenceResolver {
    asset_root: Option<PathBuf>,
}

impl CrossReferenceResolver {
    /// `asset_root` is the base for relative image paths; `None` leaves them
    /// relative to the working directory.
    pub fn new(asset_root: Option<PathBuf>) -> Self {
        Self { asset_root }
    }

    /// Rewrite `body` for chapter `chapter_index`.
    #[instrument(skip_all, fields(chapter = chapter_index))]
    pub fn resolve_chapter(
        &self,
        body: &str,
        chapter_index: u32,
        notes: &BTreeMap<String, String>,
        citations: &BTreeMap<String, CitationPayload>,
        images: &BTreeMap<String, ImagePayload>,
    ) -> ChapterResolution {
        let mut pass = Pass {
            chapter: chapter_index,
            out: ChapterResolution {
                body: String::with_capacity(body.len()),
                ..ChapterResolution::default()
            },
            notes_seen: HashMap::new(),
            citations_seen: HashSet::new(),
            bibliography_entries: 0,
            images_seen: HashSet::new(),
        };

        for node in parse_body(body) {
            match node {
                BodyNode::Text(text) => pass.out.body.push_str(text),
                BodyNode::Marker {
                    kind: MarkerKind::Note,
                    key,
                    raw,
                } => pass.note(key, raw, notes),
                BodyNode::Marker {
                    kind: MarkerKind::Citation,
                    key,
                    raw,
                } => pass.citation(key, raw, citations),
                BodyNode::Marker {
                    kind: MarkerKind::Image,
                    key,
                    raw,
                } => pass.image(key, raw, images, self.asset_root.as_deref()),
                BodyNode::UnknownMarker { kind, raw } => {
                    pass.unresolved(raw, format!("unknown marker kind '{kind}'"));
                }
            }
        }

        debug!(
            references = pass.out.references.len(),
            blocks = pass.out.blocks.len(),
            resources = pass.out.resources.len(),
            warnings = pass.out.warnings.len(),
            "chapter resolved"
        );

        pass.out
    }
}

/// State for one resolution pass over one chapter.
struct Pass<'a> {
    chapter: u32,
    out: ChapterResolution,
    /// Note key -> position in `out.references`.
    notes_seen: HashMap<&'a str, usize>,
    citations_seen: HashSet<&'a str>,
    /// Bibliography blocks emitted so far; numbers their ids.
    bibliography_entries: u32,
    /// Image keys whose resource was already emitted.
    images_seen: HashSet<&'a str>,
}

impl<'a> Pass<'a> {
    fn note(&mut self, key: &'a str, raw: &str, notes: &BTreeMap<String, String>) {
        if let Some(&pos) = self.notes_seen.get(key) {
            let reference = &self.out.references[pos];
            self.out.body.push_str(&repeat_link(reference));
            return;
        }

        let Some(text) = notes.get(key) else {
            self.unresolved(raw, format!("no note payload for key '{key}'"));
            return;
        };

        let index = self.out.references.len() as u32 + 1;
        let reference = ResolvedReference {
            key: key.to_string(),
            ref_id: format!("noteref-{}-{index}", self.chapter),
            target_id: format!("note-{}-{index}", self.chapter),
            index,
        };

        self.out.body.push_str(&forward_link(&reference));
        self.out.blocks.push(ReferenceBlock {
            kind: BlockKind::Footnote,
            key: key.to_string(),
            target_id: reference.target_id.clone(),
            backlink: Some(reference.ref_id.clone()),
            index: Some(index),
            html: footnote_html(&reference, text),
        });
        self.notes_seen.insert(key, self.out.references.len());
        self.out.references.push(reference);
    }

    fn citation(&mut self, key: &'a str, raw: &str, citations: &BTreeMap<String, CitationPayload>) {
        let Some(citation) = citations.get(key) else {
            self.unresolved(raw, format!("no citation payload for key '{key}'"));
            return;
        };

        self.out.body.push_str(&escape_xml(&citation.in_text));

        if !self.citations_seen.insert(key) {
            return;
        }
        if let Some(entry) = &citation.entry {
            self.bibliography_entries += 1;
            let target_id = format!("bib-{}-{}", self.chapter, self.bibliography_entries);
            self.out.blocks.push(ReferenceBlock {
                kind: BlockKind::Bibliography,
                key: key.to_string(),
                html: format!(
                    "<p id=\"{target_id}\" class=\"bibliography-entry\">{}</p>",
                    escape_xml(entry)
                ),
                target_id,
                backlink: None,
                index: None,
            });
        }
    }

    fn image(
        &mut self,
        key: &'a str,
        raw: &str,
        images: &BTreeMap<String, ImagePayload>,
        asset_root: Option<&Path>,
    ) {
        let Some(image) = images.get(key) else {
            self.unresolved(raw, format!("no image payload for key '{key}'"));
            return;
        };

        if self.images_seen.contains(key) {
            self.out.body.push_str(&image_html(image));
            return;
        }

        let path = match asset_root {
            Some(root) if image.path.is_relative() => root.join(&image.path),
            _ => image.path.clone(),
        };

        match std::fs::read(&path) {
            Ok(bytes) => {
                self.out.body.push_str(&image_html(image));
                self.out.resources.push(ResourceManifestEntry {
                    container_path: image.target_filename.clone(),
                    bytes,
                    media_type: guess_media_type(&image.target_filename),
                });
                self.images_seen.insert(key);
            }
            Err(e) => {
                warn!(chapter = self.chapter, key, path = %path.display(), error = %e, "image unreadable, leaving marker");
                self.out.body.push_str(raw);
                self.out.warnings.push(Warning::ResourceRead {
                    chapter: self.chapter,
                    key: key.to_string(),
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn unresolved(&mut self, raw: &str, reason: String) {
        warn!(chapter = self.chapter, marker = raw, %reason, "leaving marker unresolved");
        self.out.body.push_str(raw);
        self.out.warnings.push(Warning::UnresolvedReference {
            chapter: self.chapter,
            marker: raw.to_string(),
            reason,
        });
    }
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

fn forward_link(reference: &ResolvedReference) -> String {
    format!(
        "<a id=\"{}\" class=\"noteref\" href=\"#{}\" epub:type=\"noteref\"><sup>{}</sup></a>",
        reference.ref_id, reference.target_id, reference.index
    )
}

/// A later mention of an already numbered note. Carries no id, so the
/// footnote's backlink stays unambiguous.
fn repeat_link(reference: &ResolvedReference) -> String {
    format!(
        "<a class=\"noteref\" href=\"#{}\" epub:type=\"noteref\"><sup>{}</sup></a>",
        reference.target_id, reference.index
    )
}

fn footnote_html(reference: &ResolvedReference, text: &str) -> String {
    format!(
        "<aside id=\"{}\" class=\"footnote\" epub:type=\"footnote\"><p><a href=\"#{}\">{}.</a> {}</p></aside>",
        reference.target_id,
        reference.ref_id,
        reference.index,
        escape_xml(text)
    )
}

pub(crate) fn image_html(image: &ImagePayload) -> String {
    format!(
        "<img src=\"{}\" alt=\"{}\"/>",
        escape_xml(&image.target_filename),
        escape_xml(&image.alt_text)
    )
}

/// Guess media type from file extension.
pub fn guess_media_type(path: &str) -> String {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "gif" => "image/gif".to_string(),
        "svg" => "image/svg+xml".to_string(),
        "webp" => "image/webp".to_string(),
        "ttf" => "font/ttf".to_string(),
        "otf" => "font/otf".to_string(),
        "woff" => "font/woff".to_string(),
        "woff2" => "font/woff2".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
