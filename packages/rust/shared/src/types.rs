//! Core domain types for fixture documents.
//!
//! Everything here is plain data: built once per generation run, handed to a
//! container writer, and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// QuantitySpec
// ---------------------------------------------------------------------------

/// Declarative "how many" specification.
///
/// Parsed once from configuration. Values that do not fit the grammar are
/// kept as [`QuantitySpec::Malformed`] instead of failing the load, so a bad
/// count degrades to zero at resolution time rather than aborting a document.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantitySpec {
    /// Always this many.
    Exact(u32),
    /// Uniform over `[min, max]`. Bounds are kept raw so invalid ranges can
    /// be reported when resolved.
    Range(i64, i64),
    /// Pick `if_true` with probability `chance`, else `if_false`.
    Probabilistic {
        chance: f64,
        if_true: Box<QuantitySpec>,
        if_false: Box<QuantitySpec>,
    },
    /// Unparseable input, with the reason.
    Malformed(String),
}

impl QuantitySpec {
    /// Shorthand for a probabilistic spec.
    pub fn probabilistic(chance: f64, if_true: QuantitySpec, if_false: QuantitySpec) -> Self {
        Self::Probabilistic {
            chance,
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    /// Interpret a config value.
    ///
    /// Accepted shapes: `n`, `{ exact = n }`, `[min, max]`,
    /// `{ min = a, max = b }` and `{ chance = p, if_true = .., if_false = .. }`.
    /// A missing probabilistic branch means zero.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(_) => exact_from(value),
            Value::Array(items) if items.len() == 2 => range_from(&items[0], &items[1]),
            Value::Array(items) => Self::Malformed(format!(
                "range list needs exactly 2 bounds, got {}",
                items.len()
            )),
            Value::Object(map) => {
                if let Some(exact) = map.get("exact") {
                    return exact_from(exact);
                }
                if let Some(chance) = map.get("chance") {
                    let Some(chance) = chance.as_f64() else {
                        return Self::Malformed(format!("chance must be a number, got {chance}"));
                    };
                    let branch = |name: &str| {
                        map.get(name)
                            .map(Self::from_value)
                            .unwrap_or(Self::Exact(0))
                    };
                    return Self::probabilistic(chance, branch("if_true"), branch("if_false"));
                }
                match (map.get("min"), map.get("max")) {
                    (Some(min), Some(max)) => range_from(min, max),
                    _ => Self::Malformed(format!(
                        "expected one of exact, min/max or chance keys, got {value}"
                    )),
                }
            }
            other => Self::Malformed(format!("unsupported quantity value {other}")),
        }
    }

    /// Inverse of [`QuantitySpec::from_value`] for well-formed specs.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Exact(n) => json!(n),
            Self::Range(min, max) => json!({ "min": min, "max": max }),
            Self::Probabilistic {
                chance,
                if_true,
                if_false,
            } => json!({
                "chance": chance,
                "if_true": if_true.to_value(),
                "if_false": if_false.to_value(),
            }),
            Self::Malformed(_) => Value::Null,
        }
    }
}

fn exact_from(value: &Value) -> QuantitySpec {
    match value.as_u64() {
        Some(n) => match u32::try_from(n) {
            Ok(n) => QuantitySpec::Exact(n),
            Err(_) => QuantitySpec::Malformed(format!("exact count {n} is too large")),
        },
        None => QuantitySpec::Malformed(format!(
            "exact count must be a non-negative integer, got {value}"
        )),
    }
}

fn range_from(min: &Value, max: &Value) -> QuantitySpec {
    match (min.as_i64(), max.as_i64()) {
        (Some(min), Some(max)) => QuantitySpec::Range(min, max),
        _ => QuantitySpec::Malformed(format!("range bounds must be integers, got [{min}, {max}]")),
    }
}

impl Default for QuantitySpec {
    fn default() -> Self {
        Self::Exact(0)
    }
}

impl Serialize for QuantitySpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for QuantitySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

// ---------------------------------------------------------------------------
// NavFlag
// ---------------------------------------------------------------------------

/// Tri-state navigation switch: forced on, forced off, or inferred from the
/// format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavFlag {
    On,
    Off,
    #[default]
    Auto,
}

impl NavFlag {
    /// The explicit setting, or `None` for `Auto`.
    pub fn explicit(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Auto => None,
        }
    }
}

impl From<bool> for NavFlag {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

impl fmt::Display for NavFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("true"),
            Self::Off => f.write_str("false"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

impl Serialize for NavFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.explicit() {
            Some(b) => serializer.serialize_bool(b),
            None => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> Deserialize<'de> for NavFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(b) => Ok(b.into()),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "auto" => Ok(Self::Auto),
                "true" => Ok(Self::On),
                "false" => Ok(Self::Off),
                _ => Err(serde::de::Error::custom(format!(
                    "expected true, false or \"auto\", got \"{s}\""
                ))),
            },
            other => Err(serde::de::Error::custom(format!(
                "expected true, false or \"auto\", got {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Markers and payloads
// ---------------------------------------------------------------------------

/// The kinds of inline marker a chapter body may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Note,
    Citation,
    Image,
}

impl MarkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Citation => "citation",
            Self::Image => "image",
        }
    }

    /// Parse the kind half of a `[kind:key]` token.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "note" => Some(Self::Note),
            "citation" => Some(Self::Citation),
            "image" => Some(Self::Image),
            _ => None,
        }
    }

    /// Render the marker token for `key`.
    pub fn token(self, key: &str) -> String {
        format!("[{}:{key}]", self.as_str())
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Citation payload: the in-text string plus an optional bibliography entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationPayload {
    /// Replaces the marker verbatim.
    pub in_text: String,
    /// Appended once per chapter as a bibliography block when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

/// Image payload attached to a marker key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Source file on disk (relative paths resolve against the asset root).
    pub path: PathBuf,
    pub alt_text: String,
    /// Container-relative destination, e.g. `images/ch01_fig1.png`.
    pub target_filename: String,
}

// ---------------------------------------------------------------------------
// DocumentPlan
// ---------------------------------------------------------------------------

/// A section heading inside a chapter; may nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Fragment id of the heading inside the chapter file.
    pub anchor: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Section>,
}

/// One planned chapter. The body still carries `[kind:key]` markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based position in the document.
    pub index: u32,
    pub title: String,
    /// Container-relative file name, e.g. `chapter_001.xhtml`.
    pub file_name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
    #[serde(default)]
    pub citations: BTreeMap<String, CitationPayload>,
    #[serde(default)]
    pub images: BTreeMap<String, ImagePayload>,
}

/// The unresolved element tree for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPlan {
    /// Stable identifier derived from the generation seed.
    pub id: String,
    pub title: String,
    pub language: String,
    pub chapters: Vec<Chapter>,
}

// ---------------------------------------------------------------------------
// Resolution output
// ---------------------------------------------------------------------------

/// A numbered note link. Created once per distinct `(chapter, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub key: String,
    /// Id of the inline link in the body.
    pub ref_id: String,
    /// Id of the appended note block.
    pub target_id: String,
    /// Per-chapter note number, starting at 1.
    pub index: u32,
}

/// What an appended block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Footnote,
    Bibliography,
}

/// Content appended after a chapter body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceBlock {
    pub kind: BlockKind,
    pub key: String,
    pub target_id: String,
    /// Id of the inline reference this block links back to (footnotes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub html: String,
}

/// A binary resource to embed in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifestEntry {
    pub container_path: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ResourceManifestEntry {
    /// Hex-encoded SHA-256 of the resource bytes.
    pub fn sha256(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

/// Table-of-contents options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocSettings {
    /// Add section entries under each chapter.
    pub include_sections: bool,
    /// Deepest level emitted; chapters are level 1.
    pub max_depth: u32,
}

impl Default for TocSettings {
    fn default() -> Self {
        Self {
            include_sections: true,
            max_depth: 2,
        }
    }
}

/// Format-agnostic navigation tree node. The root is level 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavNode {
    pub title: String,
    pub href: String,
    pub level: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavNode>,
}

impl NavNode {
    /// Deepest level found in this subtree.
    pub fn depth(&self) -> u32 {
        self.children
            .iter()
            .map(NavNode::depth)
            .max()
            .unwrap_or(self.level)
    }

    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

/// Which navigation representations a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavDecision {
    pub use_legacy: bool,
    pub use_modern: bool,
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// A recoverable problem. Generation always continues past these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A count specification could not be resolved; the count became 0.
    QuantitySpec { context: String, reason: String },
    /// A marker was left verbatim because its kind or key is unknown.
    UnresolvedReference {
        chapter: u32,
        marker: String,
        reason: String,
    },
    /// An image could not be read; the marker was left verbatim.
    ResourceRead {
        chapter: u32,
        key: String,
        path: PathBuf,
        reason: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuantitySpec { context, reason } => {
                write!(f, "quantity '{context}' resolved to 0: {reason}")
            }
            Self::UnresolvedReference {
                chapter,
                marker,
                reason,
            } => write!(f, "chapter {chapter}: left {marker} unresolved: {reason}"),
            Self::ResourceRead {
                chapter,
                key,
                path,
                reason,
            } => write!(
                f,
                "chapter {chapter}: image '{key}' at {} unreadable: {reason}",
                path.display()
            ),
        }
    }
}
