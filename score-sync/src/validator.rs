use crate::types::Score;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a valid number")]
    NotANumber,
    #[error("Score must be a whole number (1, 2, 3, 4, or 5)")]
    NotWholeNumber,
    #[error("Score must be between 1 and 5")]
    OutOfRange,
}

impl ValidationError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::NotANumber => "not_a_number",
            ValidationError::NotWholeNumber => "not_whole_number",
            ValidationError::OutOfRange => "out_of_range",
        }
    }
}

/// Parses a raw field value into a score.
///
/// Callers treat blank input as "nothing to do" and must not pass it here;
/// a blank string is reported as `NotANumber`.
pub fn validate(raw: &str) -> Result<Score, ValidationError> {
    let number: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::NotANumber)?;

    if !number.is_finite() {
        return Err(ValidationError::NotANumber);
    }

    if number.fract() != 0.0 {
        return Err(ValidationError::NotWholeNumber);
    }

    if number < Score::MIN as f64 || number > Score::MAX as f64 {
        return Err(ValidationError::OutOfRange);
    }

    Ok(Score::new_unchecked(number as u8))
}

/// True for input the pipeline ignores entirely.
pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}
