use thiserror::Error;

/// Errors raised when a world, index or particle is built with invalid parameters.
///
/// Nothing in the per-frame path returns an error; once constructed, a world
/// always completes `update`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl PhysicsError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        PhysicsError::Configuration(message.into())
    }
}
