//! Validated credentials and where their content comes from.
//!
//! A [`Credential`] only exists once a file has been parsed and validated.
//! Rejected content never produces one, so everything held by the
//! [`CredentialStore`] is known good.

mod format;
mod store;

pub use format::{CredentialFormat, Fields, VALUE_FIELD};
pub use store::CredentialStore;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

/// The current, validated value of one logical credential.
#[derive(Debug)]
pub struct Credential {
    name: String,
    fields: Fields,
    version: u64,
    observed_at: DateTime<Utc>,
    modified_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(
        name: impl Into<String>,
        fields: Fields,
        version: u64,
        observed_at: DateTime<Utc>,
        modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name: name.into(),
            fields,
            version,
            observed_at,
            modified_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts at 1 and increases by one on every accepted rotation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When this version was accepted.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Modification time of the file this version was read from, if known.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    pub fn get(&self, field: &str) -> Option<&SecretString> {
        self.fields.get(field)
    }

    /// Borrow a field's secret value.
    pub fn expose(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|v| v.expose_secret())
    }

    /// The secret of a single-value credential.
    pub fn value(&self) -> Option<&str> {
        self.expose(VALUE_FIELD)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Whether `other` carries exactly the same field names and values.
    pub fn same_fields(&self, other: &Fields) -> bool {
        self.fields.len() == other.len()
            && self.fields.iter().zip(other.iter()).all(|((ka, va), (kb, vb))| {
                ka == kb && va.expose_secret() == vb.expose_secret()
            })
    }
}

/// Where credential file content is read from.
///
/// The filesystem is the only production source; tests substitute sources
/// that fail on purpose.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<String>;
}

/// Reads credential files from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsSource;

#[async_trait]
impl CredentialSource for FsSource {
    async fn read(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}
