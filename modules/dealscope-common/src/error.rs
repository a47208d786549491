use thiserror::Error;

#[derive(Error, Debug)]
pub enum DealscopeError {
    /// Insert hit an existing row with the same natural key. Recovered
    /// locally by the persistence adapter; never fails a job.
    #[error("Duplicate deal: {0}")]
    DuplicateDeal(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
