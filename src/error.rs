//! Error taxonomy for the engine.
//!
//! Guard losses (`AlreadyClaimed`, `StaleState`, `AlreadyDrawn`) are expected
//! outcomes under contention: the caller raced another request and lost, and
//! nothing was written. `Validation`, `NotFound`, and `Forbidden` are caller
//! mistakes. `Storage` is the only fatal class; the transaction has rolled
//! back and no partial state was applied.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Messages keyed by the input field that produced them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> ValidationErrors {
        ValidationErrors::default()
    }

    /// Record a message against a field.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for one field, empty if the field passed.
    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Convert into an error if any message was recorded.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Everything an engine operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Another participant holds the square.
    #[error("square is already claimed")]
    AlreadyClaimed,

    /// The square changed between the caller's read and the write.
    #[error("square was modified by another request")]
    StaleState,

    /// The grid's numbers were drawn previously.
    #[error("numbers have already been drawn")]
    AlreadyDrawn,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Pools keep at least one grid at all times.
    #[error("cannot delete the last grid in a pool")]
    LastGrid,

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    /// Build a validation error with a single field message.
    pub fn field(field: &str, message: impl Into<String>) -> Error {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        Error::Validation(errors)
    }

    /// Guard losses that are normal under contention.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::AlreadyClaimed | Error::StaleState | Error::AlreadyDrawn)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_validation_passes() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn recorded_message_fails_with_field_detail() {
        let mut errors = ValidationErrors::new();
        errors.add("claimant", "must be a different name");
        assert_eq!(errors.field("claimant"), &["must be a different name".to_string()]);
        assert_eq!(errors.field("name"), &[] as &[String]);

        let err = errors.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: claimant: must be a different name"
        );
    }

    #[test]
    fn display_joins_fields_in_order() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "is required");
        errors.add("claimant", "must only contain printable characters");
        errors.add("claimant", "must be 50 characters or fewer");
        assert_eq!(
            errors.to_string(),
            "claimant: must only contain printable characters; \
             claimant: must be 50 characters or fewer; name: is required"
        );
    }

    #[test]
    fn conflicts_are_classified() {
        assert!(Error::AlreadyClaimed.is_conflict());
        assert!(Error::StaleState.is_conflict());
        assert!(Error::AlreadyDrawn.is_conflict());
        assert!(!Error::NotFound("square").is_conflict());
        assert!(!Error::Forbidden("administrator required").is_conflict());
        assert!(!Error::LastGrid.is_conflict());
    }
}
