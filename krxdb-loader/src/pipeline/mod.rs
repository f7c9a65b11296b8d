//! The five-stage preparation pipeline.
//!
//! Stage order per date range: ingest (S1) → adjustment factors (S2) →
//! liquidity ranks (S3) → ephemeral cumulative cache (S4a) → universe
//! tables (S4b). Each stage publishes partitions only through the atomic
//! rewrite pathway, so a reader never observes a half-enriched file, and
//! re-running any stage is idempotent.

pub mod adjust;
pub mod cumulative;
pub mod ingest;
pub mod orchestrator;
pub mod rank;
pub mod universes;
