//! Parsing of rendered credential files.
//!
//! Two layouts are understood, and the layout is always declared in
//! configuration rather than guessed from the content:
//!
//! ```text
//! hunter2
//! ```
//!
//! ```text
//! # rendered by the agent
//! username=app
//! password=s3cr3t
//! ```

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Field name used for single-value credentials.
pub const VALUE_FIELD: &str = "value";

/// Parsed credential fields, keyed by field name.
pub type Fields = BTreeMap<String, SecretString>;

/// How a credential file is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialFormat {
    /// The whole file (trimmed) is one secret, exposed as the `value` field.
    #[default]
    Value,
    /// One `key=value` pair per line.
    KeyValue,
}

impl CredentialFormat {
    /// Parse raw file content and check that every required field is present
    /// and non-empty.
    ///
    /// For [`CredentialFormat::KeyValue`] with no declared fields, every field
    /// in the file is treated as required.
    pub fn parse(self, content: &str, required: &[String]) -> Result<Fields, ValidationError> {
        match self {
            CredentialFormat::Value => parse_value(content),
            CredentialFormat::KeyValue => {
                let fields = parse_key_value(content)?;
                if required.is_empty() {
                    require_non_empty(&fields, fields.keys())?;
                } else {
                    require_non_empty(&fields, required.iter())?;
                }
                Ok(fields)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CredentialFormat::Value => "value",
            CredentialFormat::KeyValue => "key-value",
        }
    }
}

impl std::fmt::Display for CredentialFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_value(content: &str) -> Result<Fields, ValidationError> {
    let value = content.trim();
    if value.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut fields = Fields::new();
    fields.insert(VALUE_FIELD.to_string(), SecretString::from(value.to_string()));
    Ok(fields)
}

fn parse_key_value(content: &str) -> Result<Fields, ValidationError> {
    let mut fields = Fields::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line
            .split_once('=')
            .ok_or(ValidationError::MalformedLine { line: line_no })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey { line: line_no });
        }
        if fields.contains_key(key) {
            return Err(ValidationError::DuplicateField {
                field: key.to_string(),
            });
        }

        let value = unquote(value.trim());
        fields.insert(key.to_string(), SecretString::from(value.to_string()));
    }

    if fields.is_empty() {
        return Err(ValidationError::Empty);
    }
    Ok(fields)
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn require_non_empty<'a>(
    fields: &Fields,
    required: impl Iterator<Item = &'a String>,
) -> Result<(), ValidationError> {
    for name in required {
        match fields.get(name) {
            None => {
                return Err(ValidationError::MissingField {
                    field: name.clone(),
                })
            }
            Some(value) if value.expose_secret().is_empty() => {
                return Err(ValidationError::EmptyField {
                    field: name.clone(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposed(fields: &Fields, name: &str) -> Option<String> {
        fields.get(name).map(|v| v.expose_secret().to_string())
    }

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_single_value_is_trimmed() {
        let fields = CredentialFormat::Value.parse("  hunter2\n", &[]).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(exposed(&fields, VALUE_FIELD).as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_single_value_empty_rejected() {
        assert_eq!(
            CredentialFormat::Value.parse("", &[]).unwrap_err(),
            ValidationError::Empty
        );
        assert_eq!(
            CredentialFormat::Value.parse(" \n\t\n", &[]).unwrap_err(),
            ValidationError::Empty
        );
    }

    #[test]
    fn test_key_value_lines() {
        let fields = CredentialFormat::KeyValue
            .parse("username=a\npassword=b\n", &required(&["username", "password"]))
            .unwrap();
        assert_eq!(exposed(&fields, "username").as_deref(), Some("a"));
        assert_eq!(exposed(&fields, "password").as_deref(), Some("b"));
    }

    #[test]
    fn test_key_value_comments_exports_and_quotes() {
        let content = "# rendered by agent\n\nexport USER = \"app\"\nPASS='p=w'\n";
        let fields = CredentialFormat::KeyValue.parse(content, &[]).unwrap();
        assert_eq!(exposed(&fields, "USER").as_deref(), Some("app"));
        assert_eq!(exposed(&fields, "PASS").as_deref(), Some("p=w"));
    }

    #[test]
    fn test_key_value_value_may_contain_equals() {
        let fields = CredentialFormat::KeyValue
            .parse("dsn=mysql://u:p@h/db?x=1", &[])
            .unwrap();
        assert_eq!(
            exposed(&fields, "dsn").as_deref(),
            Some("mysql://u:p@h/db?x=1")
        );
    }

    #[test]
    fn test_key_value_malformed_line() {
        let err = CredentialFormat::KeyValue
            .parse("username=a\njust-a-password\n", &[])
            .unwrap_err();
        assert_eq!(err, ValidationError::MalformedLine { line: 2 });
    }

    #[test]
    fn test_key_value_empty_key() {
        let err = CredentialFormat::KeyValue.parse("=oops", &[]).unwrap_err();
        assert_eq!(err, ValidationError::EmptyKey { line: 1 });
    }

    #[test]
    fn test_key_value_duplicate_key() {
        let err = CredentialFormat::KeyValue
            .parse("password=a\npassword=b", &[])
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateField {
                field: "password".to_string()
            }
        );
    }

    #[test]
    fn test_key_value_missing_required_field() {
        let err = CredentialFormat::KeyValue
            .parse("username=a", &required(&["username", "password"]))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "password".to_string()
            }
        );
    }

    #[test]
    fn test_key_value_empty_required_field() {
        let err = CredentialFormat::KeyValue
            .parse("username=a\npassword=", &required(&["username", "password"]))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::EmptyField {
                field: "password".to_string()
            }
        );
    }

    #[test]
    fn test_key_value_optional_extra_field_may_be_empty() {
        let fields = CredentialFormat::KeyValue
            .parse("password=b\ncomment=", &required(&["password"]))
            .unwrap();
        assert_eq!(exposed(&fields, "comment").as_deref(), Some(""));
    }

    #[test]
    fn test_key_value_empty_file() {
        let err = CredentialFormat::KeyValue.parse("\n# nothing\n", &[]).unwrap_err();
        assert_eq!(err, ValidationError::Empty);
    }

    #[test]
    fn test_format_deserializes_kebab_case() {
        #[derive(Deserialize)]
        struct Entry {
            format: CredentialFormat,
        }
        let entry: Entry = toml::from_str(r#"format = "key-value""#).unwrap();
        assert_eq!(entry.format, CredentialFormat::KeyValue);
        let entry: Entry = toml::from_str(r#"format = "value""#).unwrap();
        assert_eq!(entry.format, CredentialFormat::Value);
    }
}
