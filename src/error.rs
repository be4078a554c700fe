use std::path::PathBuf;

use thiserror::Error;

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the credential store, the coordinator and the consumer API.
///
/// Only [`Error::UnknownCredential`] is a caller-side mistake. The rest are
/// absorbed by the rotation coordinator or are expected during startup.
#[derive(Debug, Error)]
pub enum Error {
    /// The credential is registered but no valid file has been parsed yet.
    #[error("credential `{name}` has not been observed yet")]
    NotYetAvailable { name: String },

    /// The logical name was never registered in configuration.
    #[error("unknown credential `{name}`")]
    UnknownCredential { name: String },

    /// Reading the credential file kept failing after all retry attempts.
    #[error("failed to read {} after {attempts} attempt(s): {source}", path.display())]
    Read {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but its content is not a valid credential.
    #[error("credential `{name}` rejected: {source}")]
    Validation {
        name: String,
        #[source]
        source: ValidationError,
    },
}

impl Error {
    pub fn not_yet_available(name: impl Into<String>) -> Self {
        Error::NotYetAvailable { name: name.into() }
    }

    pub fn unknown(name: impl Into<String>) -> Self {
        Error::UnknownCredential { name: name.into() }
    }

    /// True for errors that go away once the external agent writes a valid file.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::UnknownCredential { .. })
    }
}

/// Why a credential file's content was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file is empty")]
    Empty,
    #[error("line {line} is not a key=value pair")]
    MalformedLine { line: usize },
    #[error("line {line} has an empty key")]
    EmptyKey { line: usize },
    #[error("field `{field}` appears more than once")]
    DuplicateField { field: String },
    #[error("required field `{field}` is missing")]
    MissingField { field: String },
    #[error("field `{field}` is empty")]
    EmptyField { field: String },
}
