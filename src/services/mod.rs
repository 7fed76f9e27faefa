//! Business logic services.

pub mod aggregation;
pub mod fingerprint;
pub mod ingestion;
pub mod queue_lifecycle;
pub mod reaper;
pub mod repository;
pub mod scan_queue;
pub mod suppression;
pub mod vulnerability;
