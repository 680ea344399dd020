use thiserror::Error;

use crate::db::models::ParseTagError;

pub mod appointment;
pub mod audit;
pub mod auth;
pub mod department;
pub mod notifications;
pub mod patient;
pub mod queue;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Slot {0} is already booked")]
    SlotTaken(String),
    #[error("No free token numbers left for this doctor")]
    TokenSpaceExhausted,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("An account for {0} already exists")]
    DuplicateEmail(String),
    #[error("Your role is not allowed to do that")]
    Forbidden,
}

impl From<ParseTagError> for ServiceError {
    fn from(err: ParseTagError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Rejects blank required text fields, returning the trimmed value.
pub(crate) fn required<'a>(field: &str, value: &'a str) -> ServiceResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidInput(format!("{} is required", field)));
    }
    Ok(trimmed)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("name", "  Ravi ").unwrap(), "Ravi");
        let err = required("phone", "   ").unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: phone is required");
    }

    #[test]
    fn tag_errors_become_invalid_input() {
        let err: ServiceError = "paused"
            .parse::<crate::db::models::PatientStatus>()
            .unwrap_err()
            .into();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
