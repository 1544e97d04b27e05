//! Core generation logic for fixturesmith.
//!
//! This crate turns typed settings into finished documents: quantity
//! resolution, planning, cross-reference resolution, navigation, assembly,
//! and the batch pipeline that hands documents to a [`writer::ContainerWriter`].

pub mod assembler;
pub mod nav;
pub mod pipeline;
pub mod planner;
pub mod quantity;
pub mod writer;
pub mod xref;

pub use assembler::{AssembledDocument, ResolvedChapter, assemble, verify};
pub use nav::{build_tree, decide_representations};
pub use pipeline::{
    BatchResult, DocumentOutcome, GenerateConfig, GeneratedDocument, LoadedSettings,
    ProgressReporter, SilentProgress, finish_document, generate_batch, generate_document,
    load_settings, plan_document,
};
pub use writer::{ContainerWriter, JsonBundleWriter};
