pub mod aggregator;
pub mod cache;
pub mod engine;
pub mod evaluator;
pub mod handlers;
pub mod weights;
