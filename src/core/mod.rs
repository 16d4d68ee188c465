/*!
 * Core Module
 * Fundamental engine types, constants and error handling
 */

pub mod errors;
pub mod json;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use types::*;
