//! Aggregated validation errors keyed by field path

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Classify, ErrorKind};

/// Every violation found in one validation pass, keyed by field path
/// (`name`, `steps`, `steps[0].topic`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation; the first message per field is kept
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: ")?;
        for (i, (field, message)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{field}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl Classify for ValidationErrors {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_all_fields() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "is required");
        errors.add("steps[0].topic", "is required");

        assert_eq!(
            errors.to_string(),
            "validation failed: name: is required; steps[0].topic: is required"
        );
    }

    #[test]
    fn test_first_message_wins() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "first");
        errors.add("name", "second");

        assert_eq!(errors.get("name"), Some("first"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationErrors::new().into_result().is_ok());

        let mut errors = ValidationErrors::new();
        errors.add("steps", "at least one step is required");
        assert!(errors.into_result().is_err());
    }
}
