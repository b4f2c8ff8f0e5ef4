use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every field that failed validation for one input object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fields: vec![FieldError {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|error| error.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed")?;
        for (index, error) in self.fields.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{}{} {}", separator, error.field, error.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Collects field errors so a caller sees all of them at once.
#[derive(Debug, Default)]
pub struct Validator {
    fields: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.push(field, message);
        }
        self
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                fields: self.fields,
            })
        }
    }
}

/// Distinguishes an omitted field from an explicit `null`.
///
/// Use with `#[serde(default, deserialize_with = "explicit_null")]` on an
/// `Option<Option<T>>`: omitted ⇒ `None`, `null` ⇒ `Some(None)`.
pub fn explicit_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trim a string and drop it when nothing is left.
pub fn trim_to_none(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn is_slug(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.len())
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct TtlBody {
        #[serde(default, deserialize_with = "explicit_null")]
        ttl: Option<Option<i64>>,
    }

    #[test]
    fn explicit_null_keeps_three_states() {
        let omitted: TtlBody = serde_json::from_str("{}").unwrap();
        let null: TtlBody = serde_json::from_str(r#"{"ttl": null}"#).unwrap();
        let value: TtlBody = serde_json::from_str(r#"{"ttl": 40}"#).unwrap();

        assert_eq!(omitted.ttl, None);
        assert_eq!(null.ttl, Some(None));
        assert_eq!(value.ttl, Some(Some(40)));
    }

    #[test]
    fn validator_reports_every_field() {
        let mut validator = Validator::new();
        validator
            .check(false, "slug", "is required")
            .check(true, "image", "is required")
            .check(false, "storage_gb", "must be positive");
        let error = validator.finish().unwrap_err();

        assert_eq!(error.fields.len(), 2);
        assert!(error.has_field("slug"));
        assert!(error.has_field("storage_gb"));
        assert_eq!(
            error.to_string(),
            "Validation failed: slug is required; storage_gb must be positive"
        );
    }

    #[test]
    fn slug_rules() {
        assert!(is_slug("base", 3, 64));
        assert!(is_slug("ubuntu-24-04", 3, 64));
        assert!(!is_slug("Base", 3, 64));
        assert!(!is_slug("-base", 3, 64));
        assert!(!is_slug("ab", 3, 64));
        assert!(!is_slug("with space", 3, 64));
    }
}
