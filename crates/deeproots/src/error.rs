/// Errors raised while configuring, building or training a model.
///
/// Everything fails at construction time: a model that builds runs its
/// steps without further validation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure inside the tensor engine (shape mismatch, bad geometry, ...).
    #[error(transparent)]
    Tensor(#[from] deeproots_core::Error),

    /// Invalid hyperparameters or architecture configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Images or labels that do not fit the configured model.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Error::Input(msg.into())
    }
}
