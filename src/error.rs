use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    /// Connection or query failure raised by a reader or a datasource.
    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("ItemProcessor error: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter error: {0}")]
    ItemWriter(String),

    /// Begin, commit or rollback of a chunk transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A job, step, reader or writer was built with missing or invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A job run was rejected because its instance may not be executed again.
    #[error("Restart error: {0}")]
    Restart(String),

    /// A step failed. Carries the last committed chunk boundary for diagnosis.
    #[error(
        "Step {step} failed after {committed_chunks} committed chunk(s), read position {read_position}: {source}"
    )]
    Step {
        step: String,
        committed_chunks: usize,
        read_position: usize,
        source: Box<BatchError>,
    },
}

impl BatchError {
    /// Returns the error that originally failed a step, unwrapping the step context.
    pub fn root_cause(&self) -> &BatchError {
        match self {
            BatchError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(feature = "rdbc")]
impl From<sqlx::Error> for BatchError {
    fn from(error: sqlx::Error) -> Self {
        BatchError::DataAccess(error.to_string())
    }
}
