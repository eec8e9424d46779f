//! Enrichment orchestration for productenrich.
//!
//! This crate ties search, page extraction and LLM synthesis together into
//! one request pipeline ([`EnrichmentOrchestrator::enrich`]), and wires the
//! concrete collaborators from configuration ([`build_orchestrator`]).

pub mod mode;
pub mod orchestrator;
mod wiring;

pub use orchestrator::{EnrichProgress, EnrichmentOrchestrator, SilentProgress, Stage};
pub use wiring::build_orchestrator;
