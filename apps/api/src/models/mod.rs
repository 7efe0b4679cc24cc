pub mod calendar;
pub mod ingestion;
pub mod match_cache;
pub mod position;
pub mod profile;
