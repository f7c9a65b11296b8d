//! krxdb loader
//!
//! The user-facing half of the database: a range-locked [`DataLoader`] that
//! drives the ingestion/enrichment pipeline on open and answers field
//! queries as wide (dates × symbols) frames.
//!
//! - `fetch` — the upstream fetcher capability the pipeline consumes
//! - `pipeline` — stage drivers S1–S4b and the orchestrator
//! - `fields` — declarative field registry (logical name → table/column)
//! - `shape` — long-to-wide pivoting
//! - `config` — TOML configuration facade

pub mod config;
pub mod fetch;
pub mod fields;
pub mod loader;
pub mod pipeline;
pub mod shape;

pub use config::LoaderConfig;
pub use fetch::{FixtureFetcher, RawRecord, SnapshotFetcher};
pub use fields::FieldRegistry;
pub use loader::{DataLoader, GetOptions, Universe};
pub use pipeline::orchestrator::{Orchestrator, PrepareSummary};
