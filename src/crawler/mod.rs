pub mod controller;
pub mod error;
pub mod paginator;
pub mod parse;
pub mod registration;
pub mod retry;
pub mod task;

// Re-export common types
pub use controller::CrawlerController;
