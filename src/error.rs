pub type MuralResult<T> = Result<T, MuralError>;

#[derive(thiserror::Error, Debug)]
pub enum MuralError {
    /// A requested buffer exceeds the hard per-layer cell limit.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// An API was driven out of protocol (recording twice, stopping while
    /// idle, mutating a destroyed document). These are programming errors,
    /// not user-recoverable conditions.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MuralError {
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
