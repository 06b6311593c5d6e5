use nimbus_client::{MANUAL_SHADE_RANGE, StatusStoreError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid minutes value {0}. Must be between 1 and 120.")]
    MinutesOutOfRange(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StatusStoreError),
    #[error("Manual shade control is disabled while automatic mode is on")]
    AutomaticModeActive,
    #[error("Shade status is not available yet")]
    StatusUnavailable,
    #[error("Shade controller is not running")]
    Closed,
}

pub fn validate_minutes(minutes: u32) -> Result<u32, ValidationError> {
    if MANUAL_SHADE_RANGE.contains(&minutes) {
        Ok(minutes)
    } else {
        Err(ValidationError::MinutesOutOfRange(minutes))
    }
}
