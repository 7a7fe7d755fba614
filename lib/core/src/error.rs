//! Error handling foundation shared by the flotilla crates.
//!
//! Only the `Result` alias lives here. The registry and recovery crates
//! each define their own error enums and return them wrapped in a rootcause
//! [`Report`]; the typed kind stays reachable through `current_context()`.

pub use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
