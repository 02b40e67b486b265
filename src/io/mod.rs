//! CSV ingestion and export.

pub mod export;
pub mod readings;
