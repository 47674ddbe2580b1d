//! Configuration validation
//!
//! Rules are grouped by section. Each returns a [`ValidationResult`];
//! errors make the configuration unusable, warnings are advisory.

use std::fmt;

pub mod lint;
pub mod nonce;
pub mod wfe;

/// Which part of the configuration an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Nonce,
    Redemption,
    Wfe,
    KeyPolicy,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Nonce => "nonce",
            ErrorCategory::Redemption => "redemption",
            ErrorCategory::Wfe => "wfe",
            ErrorCategory::KeyPolicy => "key_policy",
        };
        f.write_str(name)
    }
}

/// A fatal configuration problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// An advisory configuration finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accumulated errors and warnings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// No errors (warnings allowed)
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "  error: {}", error)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {}", warning.message)?;
        }
        Ok(())
    }
}

/// Whether `value` only uses the unpadded base64url alphabet.
pub(crate) fn is_base64url(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
