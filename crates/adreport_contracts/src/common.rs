#![forbid(unsafe_code)]

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SchemaVersion(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ReasonCodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    InvalidRange {
        field: &'static str,
        min: f64,
        max: f64,
        got: f64,
    },
    NotFinite {
        field: &'static str,
    },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::InvalidValue { field, reason } => write!(f, "{field}: {reason}"),
            ContractViolation::InvalidRange {
                field,
                min,
                max,
                got,
            } => write!(f, "{field}: {got} is outside {min}..={max}"),
            ContractViolation::NotFinite { field } => write!(f, "{field}: must be finite"),
        }
    }
}

impl std::error::Error for ContractViolation {}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_text(
    field: &'static str,
    text: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if text.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if text.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    if text.chars().any(|c| c.is_control()) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain control characters",
        });
    }
    Ok(())
}

pub(crate) fn validate_non_negative(field: &'static str, v: f64) -> Result<(), ContractViolation> {
    if !v.is_finite() {
        return Err(ContractViolation::NotFinite { field });
    }
    if v < 0.0 {
        return Err(ContractViolation::InvalidRange {
            field,
            min: 0.0,
            max: f64::MAX,
            got: v,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_text_rejects_blank_and_control_characters() {
        assert!(validate_text("t", "   ", 16).is_err());
        assert!(validate_text("t", "a\u{0007}b", 16).is_err());
        assert!(validate_text("t", "abcdef", 3).is_err());
        assert!(validate_text("t", "Subway Surfers", 64).is_ok());
    }

    #[test]
    fn validate_non_negative_rejects_nan_and_negative() {
        assert_eq!(
            validate_non_negative("x", f64::NAN),
            Err(ContractViolation::NotFinite { field: "x" })
        );
        assert!(validate_non_negative("x", -0.5).is_err());
        assert!(validate_non_negative("x", 0.0).is_ok());
    }

    #[test]
    fn contract_violation_display_names_the_field() {
        let v = ContractViolation::InvalidValue {
            field: "allocation_totals.impressions",
            reason: "must be > 0",
        };
        assert_eq!(v.to_string(), "allocation_totals.impressions: must be > 0");
    }
}
