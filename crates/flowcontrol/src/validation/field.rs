//! Field-path tagged validation errors.

use std::fmt;

use thiserror::Error;

/// A path to a field inside an object, such as `spec.rules[0].subjects`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    /// A path rooted at `name`.
    pub fn new(name: &str) -> Self {
        FieldPath(name.to_string())
    }

    /// The path of a named child field.
    pub fn child(&self, name: &str) -> Self {
        FieldPath(format!("{}.{}", self.0, name))
    }

    /// The path of a list element.
    pub fn index(&self, index: usize) -> Self {
        FieldPath(format!("{}[{}]", self.0, index))
    }

    /// The path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The category of a [`FieldError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorType {
    /// A required field is missing or empty.
    Required,
    /// A field has a malformed or out of range value.
    Invalid,
    /// A field must not be set in this context.
    Forbidden,
    /// A field holds a value outside a fixed set.
    NotSupported,
    /// A field value is longer than allowed.
    TooLong,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorType::Required => "Required value",
            ErrorType::Invalid => "Invalid value",
            ErrorType::Forbidden => "Forbidden",
            ErrorType::NotSupported => "Unsupported value",
            ErrorType::TooLong => "Too long",
        };
        f.write_str(text)
    }
}

/// One validation failure on one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// The kind of failure.
    pub error_type: ErrorType,
    /// Path of the offending field.
    pub field: String,
    /// The rejected value, rendered for humans, when it is worth showing.
    pub bad_value: Option<String>,
    /// Additional detail.
    pub detail: String,
}

impl FieldError {
    fn new(
        error_type: ErrorType,
        path: &FieldPath,
        bad_value: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        FieldError {
            error_type,
            field: path.to_string(),
            bad_value,
            detail: detail.into(),
        }
    }

    /// A required value is missing.
    pub fn required(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Required, path, None, detail)
    }

    /// A value is malformed.
    pub fn invalid<V: fmt::Debug>(path: &FieldPath, value: V, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Invalid, path, Some(format!("{:?}", value)), detail)
    }

    /// A value must not be set.
    pub fn forbidden(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Forbidden, path, None, detail)
    }

    /// A value is not in the supported set.
    pub fn not_supported<V: fmt::Debug>(path: &FieldPath, value: V, supported: &[&str]) -> Self {
        let detail = if supported.is_empty() {
            String::new()
        } else {
            let quoted: Vec<String> = supported.iter().map(|s| format!("{:?}", s)).collect();
            format!("supported values: {}", quoted.join(", "))
        };
        Self::new(
            ErrorType::NotSupported,
            path,
            Some(format!("{:?}", value)),
            detail,
        )
    }

    /// A value exceeds its maximum length.
    pub fn too_long(path: &FieldPath, max_length: usize) -> Self {
        Self::new(
            ErrorType::TooLong,
            path,
            None,
            format!("must have at most {} bytes", max_length),
        )
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.error_type)?;
        if let Some(value) = &self.bad_value {
            write!(f, ": {}", value)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for FieldError {}

/// Every validation failure found in one object.
pub type ErrorList = Vec<FieldError>;

/// An object was rejected. Carries every failure found, not just the first.
#[derive(Debug, Error)]
#[error("{kind} {name:?} is invalid: [{}]", join(.errors))]
pub struct ValidationError {
    /// Kind of the rejected object.
    pub kind: String,
    /// Name of the rejected object.
    pub name: String,
    /// The individual failures.
    pub errors: ErrorList,
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turns an error list into a `Result`, so callers can reject the whole
/// object with `?`.
pub fn into_result(kind: &str, name: &str, errors: ErrorList) -> Result<(), ValidationError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            kind: kind.to_string(),
            name: name.to_string(),
            errors,
        })
    }
}
