//! Error types for BVH construction.

use thiserror::Error;

/// Main error type for build operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The arena could not satisfy an allocation request
    #[error("Arena allocation of {bytes} bytes (align {align}) failed")]
    AllocationFailure { bytes: usize, align: usize },

    /// A host callback reported failure
    #[error("Node callback failed: {0}")]
    CallbackFailure(String),

    /// The progress callback requested cancellation
    #[error("Build cancelled")]
    Cancelled,
}

impl Error {
    /// Create a callback failure from a message.
    pub fn callback(msg: impl Into<String>) -> Self {
        Self::CallbackFailure(msg.into())
    }
}

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::AllocationFailure { bytes: 256, align: 64 };
        assert!(e.to_string().contains("256"));
        assert!(e.to_string().contains("64"));

        let e = Error::callback("bad node");
        assert!(e.to_string().contains("bad node"));

        assert!(Error::Cancelled.to_string().contains("cancelled"));
    }
}
