//! Common error types for Meshward components.

use thiserror::Error;

/// Common errors across Meshward components
#[derive(Debug, Error)]
pub enum MeshError {
    /// Node, mesh, user or server identifier has the wrong shape
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Power state outside 0..=7
    #[error("Invalid power state: {0}")]
    InvalidPowerState(u8),
}

impl MeshError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier(_) => 400,
            Self::InvalidPowerState(_) => 400,
        }
    }
}
