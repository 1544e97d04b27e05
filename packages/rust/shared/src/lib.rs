//! Shared types, error model, and configuration for fixturesmith.
//!
//! This crate is the foundation depended on by all other fixturesmith crates.
//! It provides:
//! - [`FixtureError`], the unified error type, and [`Warning`] for
//!   recoverable problems
//! - Domain types ([`QuantitySpec`], [`DocumentPlan`], [`NavNode`], ...)
//! - Configuration loading, merging and schema validation

pub mod config;
pub mod error;
pub mod schema;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    Config, ConfigLoader, DocumentSettings, GeneratorSettings, ImageSource, NavigationSettings,
    PayloadSettings, default_config, default_config_path, get_section, load_and_validate,
    load_defaults, load_strict, merge,
};
pub use error::{FixtureError, Result};
pub use schema::{document_schema, validate};
pub use types::{
    BlockKind, Chapter, CitationPayload, DocumentPlan, ImagePayload, MarkerKind, NavDecision,
    NavFlag, NavNode, QuantitySpec, ReferenceBlock, ResolvedReference, ResourceManifestEntry,
    Section, TocSettings, Warning,
};
