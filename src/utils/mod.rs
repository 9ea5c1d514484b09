pub mod jalali;
pub mod logging;

// Re-export common functions and types
pub use jalali::JalaliDate;
pub use logging::init_logging;
