//! Navigation builder.
//!
//! Mirrors the chapter/section structure of a plan into a format-agnostic
//! [`NavNode`] tree, and decides whether a document carries the legacy
//! index, the modern navigation document, or both. Serializing either
//! representation is the container writer's job.

use tracing::{debug, instrument, warn};

use fixturesmith_shared::{Chapter, NavDecision, NavFlag, NavNode, Section, TocSettings};

/// First format version whose readers expect the modern navigation document.
pub const MODERN_NAV_VERSION: u32 = 3;

/// Title of the virtual root node.
const ROOT_TITLE: &str = "Contents";

/// Decide which navigation representations to emit.
///
/// Explicit flags win. `Auto` means "modern from version 3, legacy before".
/// If that leaves nothing enabled, an `Auto` flag is switched on so the
/// document always carries at least one navigation table.
pub fn decide_representations(format_version: u32, legacy: NavFlag, modern: NavFlag) -> NavDecision {
    let modern_by_version = format_version >= MODERN_NAV_VERSION;

    let mut decision = NavDecision {
        use_legacy: legacy.explicit().unwrap_or(!modern_by_version),
        use_modern: modern.explicit().unwrap_or(modern_by_version),
    };

    if !decision.use_legacy && !decision.use_modern {
        match (legacy, modern) {
            (NavFlag::Auto, _) => decision.use_legacy = true,
            (_, NavFlag::Auto) => decision.use_modern = true,
            _ => {
                warn!(format_version, "both navigation flags disabled, forcing legacy index");
                decision.use_legacy = true;
            }
        }
    }

    debug!(
        format_version,
        %legacy,
        %modern,
        use_legacy = decision.use_legacy,
        use_modern = decision.use_modern,
        "navigation representations decided"
    );

    decision
}

/// Build the navigation tree for `chapters`.
///
/// The returned root is virtual (level 0, empty href). Chapters sit at
/// level 1; sections follow at increasing levels when
/// `toc.include_sections` is set. Nothing deeper than `toc.max_depth` is
/// emitted, and insertion order is preserved.
#[instrument(skip_all, fields(chapters = chapters.len(), max_depth = toc.max_depth))]
pub fn build_tree(chapters: &[Chapter], toc: &TocSettings) -> NavNode {
    let children = if toc.max_depth >= 1 {
        chapters
            .iter()
            .map(|chapter| NavNode {
                title: chapter.title.clone(),
                href: chapter.file_name.clone(),
                level: 1,
                children: if toc.include_sections {
                    section_nodes(&chapter.file_name, &chapter.sections, 2, toc.max_depth)
                } else {
                    vec![]
                },
            })
            .collect()
    } else {
        vec![]
    };

    let root = NavNode {
        title: ROOT_TITLE.to_string(),
        href: String::new(),
        level: 0,
        children,
    };

    debug!(nodes = root.descendant_count(), depth = root.depth(), "navigation tree built");
    root
}

fn section_nodes(file: &str, sections: &[Section], level: u32, max_depth: u32) -> Vec<NavNode> {
    if level > max_depth {
        return vec![];
    }

    sections
        .iter()
        .map(|section| NavNode {
            title: section.title.clone(),
            href: format!("{file}#{}", section.anchor),
            level,
            children: section_nodes(file, &section.children, level + 1, max_depth),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
