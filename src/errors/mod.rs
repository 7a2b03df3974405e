//! Centralized error handling for the tuner-relay engine
//!
//! All lifecycle operations surface failures through [`RelayError`]; the
//! alias below keeps signatures short across the service layer.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using RelayError
pub type RelayResult<T> = Result<T, RelayError>;
