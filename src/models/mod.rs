//! Database models and DTOs for all domain entities.

pub mod pagination;
pub mod repository;
pub mod safe_file;
pub mod scan_queue;
pub mod vulnerability;
