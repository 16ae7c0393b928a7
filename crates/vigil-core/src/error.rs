//! Domain error types following the panic-free policy.

use thiserror::Error;

/// Errors that can occur when compiling a watch pattern.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The glob translated to a regular expression that failed to compile.
    #[error("invalid watch pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The original glob text
        pattern: String,
        /// The underlying regex error
        source: regex::Error,
    },
}
