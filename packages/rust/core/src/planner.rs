//! Document planning: decides how many chapters, sections, notes, citations
//! and images a document gets, and lays out chapter bodies with unresolved
//! `[kind:key]` markers.
//!
//! Every count is resolved independently per chapter with a context label
//! scoped to that chapter (e.g. `notes_in_chapter_3`). Marker substitution
//! is left entirely to [`crate::xref`].

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::{debug, instrument, warn};

use fixturesmith_shared::{
    Chapter, CitationPayload, DocumentPlan, DocumentSettings, ImagePayload, MarkerKind,
    PayloadSettings, Section, Warning,
};

use crate::quantity::resolve_with;

/// Filler used when the config supplies no paragraphs.
const FILLER: &[&str] = &[
    "The committee met in the spring to review the preliminary findings and agreed to extend the survey to the northern districts.",
    "Early records are incomplete, but the surviving ledgers suggest that trade along the river doubled within a single generation.",
    "Critics at the time dismissed the proposal as impractical; only later did its influence on regional planning become clear.",
    "What follows is a summary of the evidence, arranged roughly in the order in which it was collected.",
    "Several questions remain open, and the discussion below should be read as provisional rather than final.",
    "The second edition corrects a number of errors in the tables and adds material drawn from private correspondence.",
];

/// Plan a document, logging (and discarding) any warnings.
pub fn plan<R: Rng + ?Sized>(
    document: &DocumentSettings,
    payloads: &PayloadSettings,
    rng: &mut R,
) -> DocumentPlan {
    let mut warnings = Vec::new();
    plan_with(document, payloads, rng, &mut warnings)
}

/// Plan a document, recording recoverable problems into `warnings`.
///
/// Planning never fails. Empty payload pools leave the matching chapter maps
/// empty while the markers are still emitted, so the resolver reports them.
#[instrument(skip_all, fields(title = %document.title))]
pub fn plan_with<R: Rng + ?Sized>(
    document: &DocumentSettings,
    payloads: &PayloadSettings,
    rng: &mut R,
    warnings: &mut Vec<Warning>,
) -> DocumentPlan {
    let id = document_id(rng);
    let chapter_count = resolve_with(&document.chapters, "chapters", rng, warnings);

    let repeat_chance = if (0.0..=1.0).contains(&document.repeat_note_chance) {
        document.repeat_note_chance
    } else {
        warn!(
            chance = document.repeat_note_chance,
            "repeat_note_chance outside [0, 1], disabling repeats"
        );
        0.0
    };

    let mut chapters = Vec::with_capacity(chapter_count as usize);
    for index in 1..=chapter_count {
        let planner = ChapterPlanner {
            index,
            document,
            payloads,
            repeat_chance,
        };
        chapters.push(planner.plan(rng, warnings));
    }

    debug!(%id, chapters = chapters.len(), "document planned");

    DocumentPlan {
        id,
        title: document.title.clone(),
        language: document.language.clone(),
        chapters,
    }
}

/// A UUID drawn from the injected random source, so identity is
/// reproducible per seed.
fn document_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes[..]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

// ---------------------------------------------------------------------------
// Chapter layout
// ---------------------------------------------------------------------------

/// Body blocks before rendering.
enum Block {
    Heading {
        level: u8,
        anchor: String,
        title: String,
    },
    Paragraph(String),
    Figure(String),
}

struct ChapterPlanner<'a> {
    index: u32,
    document: &'a DocumentSettings,
    payloads: &'a PayloadSettings,
    repeat_chance: f64,
}

impl ChapterPlanner<'_> {
    fn plan<R: Rng + ?Sized>(&self, rng: &mut R, warnings: &mut Vec<Warning>) -> Chapter {
        let i = self.index;
        let doc = self.document;

        let section_count = resolve_with(
            &doc.sections_per_chapter,
            &format!("sections_in_chapter_{i}"),
            rng,
            warnings,
        );
        let note_count = resolve_with(
            &doc.notes_per_chapter,
            &format!("notes_in_chapter_{i}"),
            rng,
            warnings,
        );
        let citation_count = resolve_with(
            &doc.citations_per_chapter,
            &format!("citations_in_chapter_{i}"),
            rng,
            warnings,
        );
        let image_count = resolve_with(
            &doc.images_per_chapter,
            &format!("images_in_chapter_{i}"),
            rng,
            warnings,
        );

        let title = format!("Chapter {i}");
        let mut blocks = vec![Block::Heading {
            level: 1,
            anchor: format!("chapter-{i}"),
            title: title.clone(),
        }];

        let mut sections = Vec::with_capacity(section_count as usize);
        if section_count == 0 {
            self.push_paragraphs(&mut blocks, &format!("paragraphs_in_chapter_{i}"), rng, warnings);
        }
        for s in 1..=section_count {
            sections.push(self.plan_section(&mut blocks, s, rng, warnings));
        }

        let notes = self.note_payloads(note_count, rng);
        let citations = self.citation_payloads(citation_count, rng);
        let images = self.image_payloads(image_count, rng);

        self.place_markers(&mut blocks, note_count, citation_count, image_count, rng);

        debug!(
            chapter = i,
            sections = section_count,
            notes = note_count,
            citations = citation_count,
            images = image_count,
            "chapter planned"
        );

        Chapter {
            index: i,
            title,
            file_name: format!("chapter_{i:03}.xhtml"),
            body: render(&blocks),
            sections,
            notes,
            citations,
            images,
        }
    }

    fn plan_section<R: Rng + ?Sized>(
        &self,
        blocks: &mut Vec<Block>,
        s: u32,
        rng: &mut R,
        warnings: &mut Vec<Warning>,
    ) -> Section {
        let i = self.index;
        let anchor = format!("sec-{i}-{s}");
        let title = format!("Section {i}.{s}");
        blocks.push(Block::Heading {
            level: 2,
            anchor: anchor.clone(),
            title: title.clone(),
        });
        self.push_paragraphs(
            blocks,
            &format!("paragraphs_in_chapter_{i}_section_{s}"),
            rng,
            warnings,
        );

        let sub_count = resolve_with(
            &self.document.subsections_per_section,
            &format!("subsections_in_chapter_{i}_section_{s}"),
            rng,
            warnings,
        );
        let mut children = Vec::with_capacity(sub_count as usize);
        for t in 1..=sub_count {
            let anchor = format!("sec-{i}-{s}-{t}");
            let title = format!("Section {i}.{s}.{t}");
            blocks.push(Block::Heading {
                level: 3,
                anchor: anchor.clone(),
                title: title.clone(),
            });
            self.push_paragraphs(
                blocks,
                &format!("paragraphs_in_chapter_{i}_section_{s}_{t}"),
                rng,
                warnings,
            );
            children.push(Section {
                title,
                anchor,
                children: vec![],
            });
        }

        Section {
            title,
            anchor,
            children,
        }
    }

    fn push_paragraphs<R: Rng + ?Sized>(
        &self,
        blocks: &mut Vec<Block>,
        context: &str,
        rng: &mut R,
        warnings: &mut Vec<Warning>,
    ) {
        let count = resolve_with(&self.document.paragraphs_per_section, context, rng, warnings);
        for _ in 0..count {
            let text = match self.payloads.paragraphs.choose(rng) {
                Some(p) => escape_prose(p),
                None => FILLER.choose(rng).copied().unwrap_or_default().to_string(),
            };
            blocks.push(Block::Paragraph(text));
        }
    }

    fn note_payloads<R: Rng + ?Sized>(&self, count: u32, rng: &mut R) -> BTreeMap<String, String> {
        (1..=count)
            .filter_map(|k| {
                let text = self.payloads.notes.choose(rng)?;
                Some((note_key(k), text.clone()))
            })
            .collect()
    }

    fn citation_payloads<R: Rng + ?Sized>(
        &self,
        count: u32,
        rng: &mut R,
    ) -> BTreeMap<String, CitationPayload> {
        (1..=count)
            .filter_map(|k| {
                let citation = self.payloads.citations.choose(rng)?;
                Some((citation_key(k), citation.clone()))
            })
            .collect()
    }

    fn image_payloads<R: Rng + ?Sized>(
        &self,
        count: u32,
        rng: &mut R,
    ) -> BTreeMap<String, ImagePayload> {
        let i = self.index;
        (1..=count)
            .filter_map(|k| {
                let source = self.payloads.images.choose(rng)?;
                let target_filename = source.target_filename.clone().unwrap_or_else(|| {
                    let ext = Path::new(&source.path)
                        .extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("bin");
                    format!("images/ch{i:03}_img{k}.{ext}")
                });
                Some((
                    image_key(k),
                    ImagePayload {
                        path: source.path.clone(),
                        alt_text: source.alt_text.clone(),
                        target_filename,
                    },
                ))
            })
            .collect()
    }

    /// Scatter markers over the chapter's paragraphs.
    ///
    /// Notes and citations are appended to random paragraphs; images become
    /// figure blocks after random paragraphs. A repeated note is only placed
    /// at or after the paragraph holding its first occurrence.
    fn place_markers<R: Rng + ?Sized>(
        &self,
        blocks: &mut Vec<Block>,
        notes: u32,
        citations: u32,
        images: u32,
        rng: &mut R,
    ) {
        if notes + citations + images == 0 {
            return;
        }

        let mut paragraphs: Vec<usize> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| matches!(b, Block::Paragraph(_)))
            .map(|(pos, _)| pos)
            .collect();
        if paragraphs.is_empty() {
            let text = FILLER.choose(rng).copied().unwrap_or_default().to_string();
            blocks.push(Block::Paragraph(text));
            paragraphs.push(blocks.len() - 1);
        }

        for k in 1..=notes {
            let slot = rng.random_range(0..paragraphs.len());
            let token = MarkerKind::Note.token(&note_key(k));
            append_token(blocks, paragraphs[slot], &token);

            if self.repeat_chance > 0.0 && rng.random::<f64>() < self.repeat_chance {
                let later = rng.random_range(slot..paragraphs.len());
                append_token(blocks, paragraphs[later], &token);
            }
        }

        for k in 1..=citations {
            let slot = rng.random_range(0..paragraphs.len());
            let token = MarkerKind::Citation.token(&citation_key(k));
            append_token(blocks, paragraphs[slot], &token);
        }

        // Insert from the back so earlier positions stay valid.
        let mut figures: Vec<(usize, u32)> = (1..=images)
            .map(|k| (paragraphs[rng.random_range(0..paragraphs.len())], k))
            .collect();
        figures.sort_by(|a, b| b.cmp(a));
        for (pos, k) in figures {
            blocks.insert(pos + 1, Block::Figure(MarkerKind::Image.token(&image_key(k))));
        }
    }
}

fn append_token(blocks: &mut [Block], pos: usize, token: &str) {
    if let Block::Paragraph(text) = &mut blocks[pos] {
        text.push(' ');
        text.push_str(token);
    }
}

fn note_key(k: u32) -> String {
    format!("n{k}")
}

fn citation_key(k: u32) -> String {
    format!("c{k}")
}

fn image_key(k: u32) -> String {
    format!("img{k}")
}

fn render(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|block| match block {
            Block::Heading {
                level,
                anchor,
                title,
            } => format!("<h{level} id=\"{anchor}\">{}</h{level}>", escape_xml(title)),
            Block::Paragraph(text) => format!("<p>{text}</p>"),
            Block::Figure(token) => format!("<figure>{token}</figure>"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Escape configured paragraph text. Brackets are encoded too, so prose
/// can never be read back as a `[kind:key]` marker.
fn escape_prose(s: &str) -> String {
    escape_xml(s).replace('[', "&#91;").replace(']', "&#93;")
}

/// Escape XML special characters.
pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixturesmith_shared::{ImageSource, QuantitySpec};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn document() -> DocumentSettings {
        DocumentSettings {
            chapters: QuantitySpec::Exact(3),
            sections_per_chapter: QuantitySpec::Range(1, 3),
            paragraphs_per_section: QuantitySpec::Range(1, 3),
            notes_per_chapter: QuantitySpec::Exact(2),
            citations_per_chapter: QuantitySpec::Exact(1),
            images_per_chapter: QuantitySpec::Exact(1),
            ..DocumentSettings::default()
        }
    }

    fn payloads() -> PayloadSettings {
        PayloadSettings {
            notes: vec!["A note.".into()],
            citations: vec![CitationPayload {
                in_text: "(Doe, 2001)".into(),
                entry: None,
            }],
            images: vec![ImageSource {
                path: "figure.png".into(),
                alt_text: "A figure".into(),
                target_filename: None,
            }],
            ..PayloadSettings::default()
        }
    }

    fn count(body: &str, needle: &str) -> usize {
        body.matches(needle).count()
    }

    #[test]
    fn plans_requested_structure() {
        let plan = plan(&document(), &payloads(), &mut StdRng::seed_from_u64(1));
        assert_eq!(plan.chapters.len(), 3);

        for (n, chapter) in plan.chapters.iter().enumerate() {
            let i = n as u32 + 1;
            assert_eq!(chapter.index, i);
            assert_eq!(chapter.file_name, format!("chapter_{i:03}.xhtml"));
            assert!((1..=3).contains(&chapter.sections.len()));
            assert_eq!(chapter.notes.len(), 2);
            assert_eq!(chapter.citations.len(), 1);
            assert_eq!(chapter.images.len(), 1);
            assert_eq!(count(&chapter.body, "[note:n1]"), 1);
            assert_eq!(count(&chapter.body, "[note:n2]"), 1);
            assert_eq!(count(&chapter.body, "[citation:c1]"), 1);
            assert_eq!(count(&chapter.body, "<figure>[image:img1]</figure>"), 1);
            for section in &chapter.sections {
                assert!(chapter.body.contains(&format!("id=\"{}\"", section.anchor)));
            }
        }
    }

    #[test]
    fn same_seed_same_plan() {
        let a = plan(&document(), &payloads(), &mut StdRng::seed_from_u64(77));
        let b = plan(&document(), &payloads(), &mut StdRng::seed_from_u64(77));
        assert_eq!(a, b);

        let c = plan(&document(), &payloads(), &mut StdRng::seed_from_u64(78));
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn missing_payload_pools_still_emit_markers() {
        let plan = plan(&document(), &PayloadSettings::default(), &mut StdRng::seed_from_u64(3));
        let chapter = &plan.chapters[0];
        assert!(chapter.notes.is_empty());
        assert!(chapter.citations.is_empty());
        assert!(chapter.images.is_empty());
        assert!(chapter.body.contains("[note:n1]"));
        assert!(chapter.body.contains("[image:img1]"));
    }

    #[test]
    fn image_targets_derive_from_source_extension() {
        let plan = plan(&document(), &payloads(), &mut StdRng::seed_from_u64(4));
        let image = &plan.chapters[1].images["img1"];
        assert_eq!(image.target_filename, "images/ch002_img1.png");
        assert_eq!(image.alt_text, "A figure");
    }

    #[test]
    fn zero_sections_still_hosts_markers() {
        let doc = DocumentSettings {
            chapters: QuantitySpec::Exact(1),
            sections_per_chapter: QuantitySpec::Exact(0),
            paragraphs_per_section: QuantitySpec::Exact(0),
            notes_per_chapter: QuantitySpec::Exact(1),
            ..DocumentSettings::default()
        };
        let plan = plan(&doc, &payloads(), &mut StdRng::seed_from_u64(9));
        let chapter = &plan.chapters[0];
        assert!(chapter.sections.is_empty());
        assert!(chapter.body.contains("<p>"));
        assert!(chapter.body.contains("[note:n1]"));
    }

    #[test]
    fn subsections_nest_under_sections() {
        let doc = DocumentSettings {
            chapters: QuantitySpec::Exact(1),
            sections_per_chapter: QuantitySpec::Exact(2),
            subsections_per_section: QuantitySpec::Exact(2),
            ..DocumentSettings::default()
        };
        let plan = plan(&doc, &payloads(), &mut StdRng::seed_from_u64(10));
        let sections = &plan.chapters[0].sections;
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].children[0].anchor, "sec-1-2-1");
        assert!(plan.chapters[0].body.contains("<h3 id=\"sec-1-2-2\">"));
    }

    #[test]
    fn repeated_notes_follow_their_first_use() {
        let doc = DocumentSettings {
            chapters: QuantitySpec::Exact(4),
            notes_per_chapter: QuantitySpec::Exact(3),
            repeat_note_chance: 1.0,
            ..document()
        };
        let plan = plan(&doc, &payloads(), &mut StdRng::seed_from_u64(12));
        for chapter in &plan.chapters {
            for key in ["n1", "n2", "n3"] {
                let token = format!("[note:{key}]");
                assert_eq!(count(&chapter.body, &token), 2, "{token} in {}", chapter.body);
            }
        }
    }

    #[test]
    fn malformed_counts_become_warnings() {
        let doc = DocumentSettings {
            chapters: QuantitySpec::Exact(2),
            notes_per_chapter: QuantitySpec::Range(4, 1),
            ..DocumentSettings::default()
        };
        let mut warnings = Vec::new();
        let plan = plan_with(&doc, &payloads(), &mut StdRng::seed_from_u64(5), &mut warnings);
        assert_eq!(plan.chapters.len(), 2);
        let contexts: Vec<String> = warnings
            .iter()
            .filter_map(|w| match w {
                Warning::QuantitySpec { context, .. } => Some(context.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(contexts, vec!["notes_in_chapter_1", "notes_in_chapter_2"]);
    }

    #[test]
    fn configured_paragraphs_are_escaped() {
        let doc = DocumentSettings {
            chapters: QuantitySpec::Exact(1),
            paragraphs_per_section: QuantitySpec::Exact(1),
            ..DocumentSettings::default()
        };
        let payloads = PayloadSettings {
            paragraphs: vec!["Fish & <chips>".into()],
            ..PayloadSettings::default()
        };
        let plan = plan(&doc, &payloads, &mut StdRng::seed_from_u64(0));
        assert!(plan.chapters[0].body.contains("<p>Fish &amp; &lt;chips&gt;</p>"));
    }

    #[test]
    fn marker_syntax_in_paragraphs_stays_literal() {
        let doc = DocumentSettings {
            chapters: QuantitySpec::Exact(1),
            sections_per_chapter: QuantitySpec::Exact(1),
            paragraphs_per_section: QuantitySpec::Exact(1),
            notes_per_chapter: QuantitySpec::Exact(1),
            ..DocumentSettings::default()
        };
        let payloads = PayloadSettings {
            notes: vec!["A note.".into()],
            paragraphs: vec!["Prose mentioning [note:n1] literally.".into()],
            ..PayloadSettings::default()
        };
        let plan = plan(&doc, &payloads, &mut StdRng::seed_from_u64(0));
        let chapter = &plan.chapters[0];

        assert!(chapter.body.contains("Prose mentioning &#91;note:n1&#93; literally."));
        assert_eq!(count(&chapter.body, "[note:n1]"), 1);

        let resolved = crate::xref::CrossReferenceResolver::default().resolve_chapter(
            &chapter.body,
            chapter.index,
            &chapter.notes,
            &chapter.citations,
            &chapter.images,
        );
        let literal = resolved.body.find("&#91;note:n1&#93; literally.").expect("literal prose");
        let link = resolved.body.find("id=\"noteref-1-1\"").expect("planned marker");
        assert!(literal < link, "{}", resolved.body);
        assert_eq!(count(&resolved.body, "id=\"noteref-1-1\""), 1);
    }
}
