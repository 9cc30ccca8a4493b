use std::fmt;

use serde::Serialize;

/// A single failed attribute check. `field` is `None` for record-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: Option<&'static str>,
    pub message: String,
}

impl FieldError {
    /// Human-readable message with the attribute name prefixed, e.g. `Title can't be blank`.
    pub fn full_message(&self) -> String {
        match self.field {
            Some(field) => format!("{} {}", humanize(field), self.message),
            None => self.message.clone(),
        }
    }
}

/// Accumulates every failed check so callers can report them together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: Some(field),
            message: message.into(),
        });
    }

    pub fn add_base(&mut self, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: None,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.iter().any(|err| err.field == Some(field))
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn full_messages(&self) -> Vec<String> {
        self.errors.iter().map(FieldError::full_message).collect()
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_messages().join(", "))
    }
}

fn humanize(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
