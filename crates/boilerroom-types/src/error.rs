//! Error types for data decoding in boilerroom-types.

use thiserror::Error;

/// Errors that can occur when decoding plant data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A numeric status code has no matching variant.
    #[error("Unknown {kind} code: {code}")]
    UnknownCode {
        /// Which status table was consulted.
        kind: &'static str,
        /// The offending code.
        code: u8,
    },
}
