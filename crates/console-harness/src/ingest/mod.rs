//! Batch ingestion against a rate-limited backend.
//!
//! `machine` holds the pure state transitions; `driver` performs the batch
//! calls and owns the continuation and cooldown timers.

mod driver;
mod machine;
mod policy;

pub use driver::{IngestOutcome, IngestionLoop};
pub use machine::{
    BatchResponse, BatchStatus, IngestEffect, IngestMachine, IngestMsg, IngestionState,
    NOTHING_TO_INGEST, Phase, StatsResponse, update,
};
pub use policy::IngestPolicy;
