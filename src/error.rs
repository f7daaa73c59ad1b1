use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubdefError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Solve error: {0}")]
    Solve(String),

    #[error("Factorization error: {0}")]
    Factorization(String),
}

pub type Result<T> = std::result::Result<T, SubdefError>;
