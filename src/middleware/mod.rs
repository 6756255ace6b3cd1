//! Observability middleware (SPEC_FULL.md §4.L).

pub mod logging;

pub use logging::request_logging;
