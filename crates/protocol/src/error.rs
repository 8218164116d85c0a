//! Descriptor decoding errors

use thiserror::Error;

/// Reasons a class-specific descriptor stream was rejected
///
/// The lenient parser never surfaces these; they exist so callers can log
/// why a device was judged incompatible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// An entry declared a length too small to hold its own header
    #[error("Descriptor entry at offset {offset} declares length {length}")]
    InvalidLength { offset: usize, length: u8 },

    /// A read would run past the end of the buffer
    #[error("Truncated descriptor at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A function descriptor declared more specializations than it carries
    #[error("Function descriptor declares {declared} specializations but holds only {available}")]
    SpecializationOverrun { declared: usize, available: usize },
}

/// Type alias for descriptor results
pub type Result<T> = std::result::Result<T, DescriptorError>;
