use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model stream failed: {0:#}")]
    Model(anyhow::Error),

    #[error("Failed to persist message: {0:#}")]
    Persistence(anyhow::Error),
}
