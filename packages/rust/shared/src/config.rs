//! Configuration loading for fixturesmith.
//!
//! A generation run reads an optional user config file and layers it over a
//! best-effort defaults file (`$FIXTURESMITH_DEFAULTS`, else
//! `<config dir>/fixturesmith/defaults.toml`). Both are TOML or JSON and land
//! in the same dynamic tree, which is merged, optionally schema-validated,
//! and only then turned into the typed settings below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{FixtureError, Result};
use crate::schema;
use crate::types::{CitationPayload, NavFlag, QuantitySpec, TocSettings};

/// Environment variable overriding the defaults file location.
pub const DEFAULTS_ENV_VAR: &str = "FIXTURESMITH_DEFAULTS";

/// Directory name under the platform config dir.
const CONFIG_DIR_NAME: &str = "fixturesmith";

/// Defaults file name inside [`CONFIG_DIR_NAME`].
const DEFAULTS_FILE_NAME: &str = "defaults.toml";

/// A nested configuration tree.
pub type Config = Map<String, Value>;

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Location of the defaults file, if one can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(DEFAULTS_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(DEFAULTS_FILE_NAME))
}

/// Load a config file exactly as written. Never consults defaults.
pub fn load_strict(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(FixtureError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| FixtureError::parse(path, format!("cannot read: {e}")))?;

    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&content).map_err(|e| FixtureError::parse(path, e.to_string()))?
        }
        _ => toml::from_str(&content).map_err(|e| FixtureError::parse(path, e.to_string()))?,
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(FixtureError::parse(
            path,
            format!("top level must be a table, got {other}"),
        )),
    }
}

/// Recursively merge `overrides` onto `base`.
///
/// Tables merge key by key. Every other value, lists included, replaces the
/// base value wholesale.
pub fn merge(base: &Config, overrides: &Config) -> Config {
    let mut merged = base.clone();
    for (key, value) in overrides {
        let combined = match (merged.get(key), value) {
            (Some(Value::Object(b)), Value::Object(o)) => Value::Object(merge(b, o)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

/// Return the table at `key`, or an empty table when absent or not a table.
pub fn get_section(config: &Config, key: &str) -> Config {
    match config.get(key) {
        Some(Value::Object(section)) => section.clone(),
        _ => Map::new(),
    }
}

/// Loads configuration against a particular defaults source.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    defaults_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader using the standard defaults location.
    pub fn new() -> Self {
        Self {
            defaults_path: default_config_path(),
        }
    }

    /// Loader reading defaults from a specific file.
    pub fn with_defaults_path(path: impl Into<PathBuf>) -> Self {
        Self {
            defaults_path: Some(path.into()),
        }
    }

    /// Loader with no defaults source at all.
    pub fn without_defaults() -> Self {
        Self {
            defaults_path: None,
        }
    }

    pub fn defaults_path(&self) -> Option<&Path> {
        self.defaults_path.as_deref()
    }

    /// Best-effort defaults. Missing or broken sources yield an empty tree.
    pub fn load_defaults(&self) -> Config {
        let Some(path) = self.defaults_path.as_deref() else {
            return Map::new();
        };

        if !path.exists() {
            tracing::debug!(?path, "defaults file not found, continuing without defaults");
            return Map::new();
        }

        match load_strict(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(?path, error = %e, "ignoring unreadable defaults file");
                Map::new()
            }
        }
    }

    /// Load defaults, layer `path` over them and validate against `schema`.
    pub fn load_and_validate(&self, path: Option<&Path>, schema: Option<&Value>) -> Result<Config> {
        let defaults = self.load_defaults();

        let merged = match path {
            Some(path) => merge(&defaults, &load_strict(path)?),
            None => defaults,
        };

        if merged.is_empty() {
            let path = path
                .or(self.defaults_path.as_deref())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Err(FixtureError::ConfigNotFound { path });
        }

        if let Some(schema) = schema {
            schema::validate(&Value::Object(merged.clone()), schema)?;
        }

        tracing::debug!(keys = merged.len(), "configuration loaded");
        Ok(merged)
    }

    /// Write the built-in defaults to the defaults location.
    /// Returns the path to the created file.
    pub fn init_defaults(&self) -> Result<PathBuf> {
        let path = self
            .defaults_path
            .clone()
            .ok_or_else(|| FixtureError::config("could not determine config directory"))?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| FixtureError::io(dir, e))?;
        }

        let content = toml::to_string_pretty(&default_config())
            .map_err(|e| FixtureError::config(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| FixtureError::io(&path, e))?;
        tracing::info!(?path, "created defaults file");

        Ok(path)
    }
}

/// [`ConfigLoader::load_defaults`] against the standard location.
pub fn load_defaults() -> Config {
    ConfigLoader::new().load_defaults()
}

/// [`ConfigLoader::load_and_validate`] against the standard location.
pub fn load_and_validate(path: Option<&Path>, schema: Option<&Value>) -> Result<Config> {
    ConfigLoader::new().load_and_validate(path, schema)
}

/// The configuration `config init` writes.
pub fn default_config() -> Config {
    let value = json!({
        "document": {
            "title": "Synthetic Fixture",
            "language": "en",
            "format_version": 3,
            "chapters": { "min": 3, "max": 6 },
            "sections_per_chapter": { "min": 1, "max": 3 },
            "subsections_per_section": { "chance": 0.3, "if_true": { "min": 1, "max": 2 }, "if_false": 0 },
            "paragraphs_per_section": { "min": 2, "max": 4 },
            "notes_per_chapter": { "chance": 0.8, "if_true": { "min": 1, "max": 4 }, "if_false": 0 },
            "citations_per_chapter": { "min": 0, "max": 2 },
            "images_per_chapter": { "chance": 0.5, "if_true": 1, "if_false": 0 },
            "repeat_note_chance": 0.2
        },
        "navigation": {
            "legacy": "auto",
            "modern": "auto",
            "include_sections": true,
            "max_depth": 2
        },
        "payloads": {
            "notes": [
                "See the appendix for the full derivation.",
                "This claim is disputed in later editions.",
                "Translated from the original by the editor."
            ],
            "citations": [
                { "in_text": "(Doe, 2001)", "entry": "Doe, J. (2001). A Study of Fixtures. Example Press." },
                { "in_text": "(Roe & Poe, 1999)", "entry": "Roe, R., & Poe, P. (1999). Synthetic Texts. Sample House." }
            ],
            "images": []
        }
    });

    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Typed settings (parsed once from the merged tree)
// ---------------------------------------------------------------------------

/// `[document]` section: structure and counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSettings {
    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_language")]
    pub language: String,

    /// Container format version; 3 and above prefer modern navigation.
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    #[serde(default = "default_chapters")]
    pub chapters: QuantitySpec,

    #[serde(default = "default_sections")]
    pub sections_per_chapter: QuantitySpec,

    #[serde(default)]
    pub subsections_per_section: QuantitySpec,

    #[serde(default = "default_paragraphs")]
    pub paragraphs_per_section: QuantitySpec,

    #[serde(default)]
    pub notes_per_chapter: QuantitySpec,

    #[serde(default)]
    pub citations_per_chapter: QuantitySpec,

    #[serde(default)]
    pub images_per_chapter: QuantitySpec,

    /// Chance that a paragraph re-cites a note already used in its chapter.
    #[serde(default)]
    pub repeat_note_chance: f64,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            title: default_title(),
            language: default_language(),
            format_version: default_format_version(),
            chapters: default_chapters(),
            sections_per_chapter: default_sections(),
            subsections_per_section: QuantitySpec::default(),
            paragraphs_per_section: default_paragraphs(),
            notes_per_chapter: QuantitySpec::default(),
            citations_per_chapter: QuantitySpec::default(),
            images_per_chapter: QuantitySpec::default(),
            repeat_note_chance: 0.0,
        }
    }
}

fn default_title() -> String {
    "Untitled Fixture".into()
}
fn default_language() -> String {
    "en".into()
}
fn default_format_version() -> u32 {
    3
}
fn default_chapters() -> QuantitySpec {
    QuantitySpec::Exact(3)
}
fn default_sections() -> QuantitySpec {
    QuantitySpec::Exact(1)
}
fn default_paragraphs() -> QuantitySpec {
    QuantitySpec::Range(1, 3)
}

/// `[navigation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationSettings {
    /// Legacy index (format versions below 3).
    #[serde(default)]
    pub legacy: NavFlag,

    /// Modern navigation document (format version 3 and up).
    #[serde(default)]
    pub modern: NavFlag,

    #[serde(default = "default_true")]
    pub include_sections: bool,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            legacy: NavFlag::Auto,
            modern: NavFlag::Auto,
            include_sections: true,
            max_depth: default_max_depth(),
        }
    }
}

impl NavigationSettings {
    pub fn toc_settings(&self) -> TocSettings {
        TocSettings {
            include_sections: self.include_sections,
            max_depth: self.max_depth,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_depth() -> u32 {
    2
}

/// An image in the payload pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    pub path: PathBuf,
    pub alt_text: String,
    /// Destination inside the container; derived per use when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_filename: Option<String>,
}

/// `[payloads]` section: content pools the planner draws from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadSettings {
    /// Base directory for relative image paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<PathBuf>,

    #[serde(default)]
    pub notes: Vec<String>,

    #[serde(default)]
    pub citations: Vec<CitationPayload>,

    #[serde(default)]
    pub images: Vec<ImageSource>,

    /// Filler paragraphs; built-in text is used when empty.
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

/// All typed views of one merged configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorSettings {
    pub document: DocumentSettings,
    pub navigation: NavigationSettings,
    pub payloads: PayloadSettings,
}

impl GeneratorSettings {
    /// Parse and check the typed sections of a merged config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = Self {
            document: parse_section(config, "document")?,
            navigation: parse_section(config, "navigation")?,
            payloads: parse_section(config, "payloads")?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot produce a usable document.
    pub fn validate(&self) -> Result<()> {
        if self.document.format_version == 0 {
            return Err(FixtureError::config("document.format_version must be at least 1"));
        }

        let chance = self.document.repeat_note_chance;
        if !(0.0..=1.0).contains(&chance) {
            return Err(FixtureError::config(format!(
                "document.repeat_note_chance must be within [0, 1], got {chance}"
            )));
        }

        if self.navigation.max_depth == 0 {
            return Err(FixtureError::config("navigation.max_depth must be at least 1"));
        }

        if self.navigation.legacy == NavFlag::Off && self.navigation.modern == NavFlag::Off {
            return Err(FixtureError::config(
                "navigation.legacy and navigation.modern are both false; a document needs at least one navigation table",
            ));
        }

        let mut targets: HashMap<&str, &Path> = HashMap::new();
        for image in &self.payloads.images {
            let Some(target) = image.target_filename.as_deref() else {
                continue;
            };
            if let Some(previous) = targets.insert(target, &image.path) {
                if previous != image.path.as_path() {
                    return Err(FixtureError::config(format!(
                        "payloads.images: '{}' and '{}' both target '{target}'",
                        previous.display(),
                        image.path.display()
                    )));
                }
            }
        }

        Ok(())
    }
}

fn parse_section<T: DeserializeOwned>(config: &Config, key: &str) -> Result<T> {
    serde_json::from_value(Value::Object(get_section(config, key)))
        .map_err(|e| FixtureError::config(format!("[{key}]: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(value: Value) -> Config {
        match value {
            Value::Object(map) => map,
            other => panic!("not a table: {other}"),
        }
    }

    #[test]
    fn merge_is_recursive_for_tables() {
        let base = table(json!({ "document": { "title": "Base", "language": "en" }, "keep": 1 }));
        let overrides = table(json!({ "document": { "title": "Override" } }));

        let merged = merge(&base, &overrides);
        assert_eq!(merged["document"]["title"], "Override");
        assert_eq!(merged["document"]["language"], "en");
        assert_eq!(merged["keep"], 1);
    }

    #[test]
    fn merge_replaces_lists_and_scalars_wholesale() {
        let base = table(json!({ "payloads": { "notes": ["a", "b"] }, "document": { "chapters": { "min": 1, "max": 2 } } }));
        let overrides = table(json!({ "payloads": { "notes": ["c"] }, "document": { "chapters": 4 } }));

        let merged = merge(&base, &overrides);
        assert_eq!(merged["payloads"]["notes"], json!(["c"]));
        assert_eq!(merged["document"]["chapters"], json!(4));
    }

    #[test]
    fn merge_table_over_scalar_replaces() {
        let base = table(json!({ "document": "oops" }));
        let overrides = table(json!({ "document": { "title": "T" } }));
        assert_eq!(merge(&base, &overrides)["document"], json!({ "title": "T" }));
    }

    #[test]
    fn get_section_never_fails() {
        let config = table(json!({ "document": { "title": "T" }, "navigation": 3 }));
        assert_eq!(get_section(&config, "document")["title"], "T");
        assert!(get_section(&config, "navigation").is_empty());
        assert!(get_section(&config, "missing").is_empty());
    }

    #[test]
    fn load_strict_reads_toml_and_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let toml_path = dir.path().join("a.toml");
        std::fs::write(&toml_path, "[document]\ntitle = \"From TOML\"\nchapters = [1, 2]\n").expect("write");
        let json_path = dir.path().join("b.json");
        std::fs::write(&json_path, r#"{ "document": { "title": "From JSON" } }"#).expect("write");

        assert_eq!(load_strict(&toml_path).expect("toml")["document"]["title"], "From TOML");
        assert_eq!(load_strict(&json_path).expect("json")["document"]["title"], "From JSON");
    }

    #[test]
    fn load_strict_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            load_strict(&missing),
            Err(FixtureError::ConfigNotFound { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[document\n").expect("write");
        assert!(matches!(
            load_strict(&broken),
            Err(FixtureError::ConfigParse { .. })
        ));

        let scalar = dir.path().join("scalar.json");
        std::fs::write(&scalar, "42").expect("write");
        assert!(matches!(
            load_strict(&scalar),
            Err(FixtureError::ConfigParse { .. })
        ));
    }

    #[test]
    fn load_strict_unreadable_path_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_strict(dir.path()).unwrap_err();
        assert!(matches!(err, FixtureError::ConfigParse { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn load_defaults_is_best_effort() {
        let dir = tempfile::tempdir().expect("tempdir");

        let missing = ConfigLoader::with_defaults_path(dir.path().join("nope.toml"));
        assert!(missing.load_defaults().is_empty());

        let broken_path = dir.path().join("broken.toml");
        std::fs::write(&broken_path, "= nonsense").expect("write");
        assert!(ConfigLoader::with_defaults_path(&broken_path).load_defaults().is_empty());

        assert!(ConfigLoader::without_defaults().load_defaults().is_empty());
    }

    #[test]
    fn load_and_validate_merges_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let defaults = dir.path().join("defaults.toml");
        std::fs::write(&defaults, "[document]\ntitle = \"Default\"\nlanguage = \"fr\"\n").expect("write");
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "[document]\ntitle = \"Mine\"\n").expect("write");

        let loader = ConfigLoader::with_defaults_path(&defaults);
        let config = loader
            .load_and_validate(Some(&user), Some(&schema::document_schema()))
            .expect("load");
        assert_eq!(config["document"]["title"], "Mine");
        assert_eq!(config["document"]["language"], "fr");

        let only_defaults = loader.load_and_validate(None, None).expect("defaults only");
        assert_eq!(only_defaults["document"]["title"], "Default");
    }

    #[test]
    fn load_and_validate_without_any_data_is_not_found() {
        let loader = ConfigLoader::without_defaults();
        assert!(matches!(
            loader.load_and_validate(None, None),
            Err(FixtureError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn load_and_validate_missing_user_file_does_not_fall_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let defaults = dir.path().join("defaults.toml");
        std::fs::write(&defaults, "[document]\ntitle = \"Default\"\n").expect("write");

        let loader = ConfigLoader::with_defaults_path(&defaults);
        let result = loader.load_and_validate(Some(&dir.path().join("absent.toml")), None);
        assert!(matches!(result, Err(FixtureError::ConfigNotFound { .. })));
    }

    #[test]
    fn load_and_validate_reports_schema_violation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "[document]\nformat_version = \"3\"\n").expect("write");

        let err = ConfigLoader::without_defaults()
            .load_and_validate(Some(&user), Some(&schema::document_schema()))
            .unwrap_err();
        assert!(matches!(err, FixtureError::SchemaValidation { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn init_defaults_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = ConfigLoader::with_defaults_path(dir.path().join("nested").join("defaults.toml"));
        let path = loader.init_defaults().expect("init");
        assert!(path.exists());

        let config = loader
            .load_and_validate(None, Some(&schema::document_schema()))
            .expect("load written defaults");
        let settings = GeneratorSettings::from_config(&config).expect("typed");
        assert_eq!(settings.document.format_version, 3);
        assert_eq!(settings.document.chapters, QuantitySpec::Range(3, 6));
        assert_eq!(settings.payloads.citations.len(), 2);
    }

    #[test]
    fn typed_settings_fall_back_to_defaults() {
        let settings = GeneratorSettings::from_config(&Map::new()).expect("empty config");
        assert_eq!(settings.document.chapters, QuantitySpec::Exact(3));
        assert_eq!(settings.navigation.legacy, NavFlag::Auto);
        assert_eq!(settings.navigation.max_depth, 2);
        assert!(settings.payloads.notes.is_empty());
    }

    #[test]
    fn typed_settings_reject_unusable_values() {
        let both_off = table(json!({ "navigation": { "legacy": false, "modern": false } }));
        let err = GeneratorSettings::from_config(&both_off).unwrap_err();
        assert!(err.to_string().contains("both false"));

        let bad_chance = table(json!({ "document": { "repeat_note_chance": 1.5 } }));
        assert!(GeneratorSettings::from_config(&bad_chance).is_err());

        let bad_flag = table(json!({ "navigation": { "modern": "sometimes" } }));
        let err = GeneratorSettings::from_config(&bad_flag).unwrap_err();
        assert!(err.to_string().contains("[navigation]"));
    }

    #[test]
    fn typed_settings_reject_shared_image_targets() {
        let clash = table(json!({ "payloads": { "images": [
            { "path": "a.png", "alt_text": "A", "target_filename": "images/fig.png" },
            { "path": "b.png", "alt_text": "B", "target_filename": "images/fig.png" }
        ] } }));
        let err = GeneratorSettings::from_config(&clash).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("images/fig.png"));

        let same_source = table(json!({ "payloads": { "images": [
            { "path": "a.png", "alt_text": "A", "target_filename": "images/fig.png" },
            { "path": "a.png", "alt_text": "A again", "target_filename": "images/fig.png" },
            { "path": "b.png", "alt_text": "B" }
        ] } }));
        assert!(GeneratorSettings::from_config(&same_source).is_ok());
    }

    #[test]
    fn malformed_quantity_does_not_fail_loading() {
        let config = table(json!({ "document": { "chapters": "lots" } }));
        let settings = GeneratorSettings::from_config(&config).expect("still loads");
        assert!(matches!(settings.document.chapters, QuantitySpec::Malformed(_)));
    }
}
