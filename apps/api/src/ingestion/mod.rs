pub mod fetcher;
pub mod handlers;
pub mod queue;
pub mod resolver;
pub mod runner;
