//! Error taxonomy for tree transfer and printing.
//!
//! Per-file failures (unsupported type, idempotence, malformed input) are
//! attached to the affected file so a batch can finish with partial results.
//! Protocol and IO failures are fatal to the connection: once the reference
//! caches on either side disagree there is no local repair, only teardown.

use crate::rpc::codec::SourceFileType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    /// The record stream and the reference cache no longer agree.
    /// Cache index out of range, unexpected record tag, truncated frame,
    /// or a protocol version the peer does not speak.
    #[error("protocol desynchronized: {0}")]
    Protocol(String),

    /// No codec is registered for this source-file type.
    #[error("no codec registered for {0:?} files")]
    UnsupportedType(SourceFileType),

    /// Printing the tree and re-parsing the output did not yield the same
    /// tree. Surfaced with the printed text and a description of the
    /// divergence so it can be inspected; never auto-corrected.
    #[error("print idempotence violated for {path}: {detail}")]
    Idempotence {
        path: String,
        detail: String,
        printed: String,
    },

    /// Malformed source text from a producer.
    #[error("malformed source in {path} at byte {offset}: {message}")]
    Encoding {
        path: String,
        offset: usize,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether this error poisons the whole connection rather than one file.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, WireError::Protocol(_) | WireError::Io(_))
    }

    /// Wire error code for ErrorMsg/Fatal frames.
    pub fn code(&self) -> u16 {
        match self {
            WireError::Protocol(_) => 1,
            WireError::UnsupportedType(_) => 2,
            WireError::Idempotence { .. } => 3,
            WireError::Encoding { .. } => 4,
            WireError::Io(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(WireError::Protocol("index 9 out of range".into()).is_connection_fatal());
        assert!(!WireError::UnsupportedType(SourceFileType::Yaml).is_connection_fatal());
        assert!(!WireError::Idempotence {
            path: "a.json".into(),
            detail: "re-parsed tree differs".into(),
            printed: "1".into(),
        }
        .is_connection_fatal());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(WireError::Protocol(String::new()).code(), 1);
        assert_eq!(WireError::UnsupportedType(SourceFileType::Xml).code(), 2);
    }
}
