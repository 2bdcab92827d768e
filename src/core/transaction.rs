use crate::error::BatchError;

/// Transaction boundary wrapped around every chunk.
///
/// Only the step calls these methods: one `begin` per chunk, followed by exactly one
/// `commit` or `rollback`.
pub trait TransactionManager {
    fn begin(&self) -> Result<(), BatchError>;

    fn commit(&self) -> Result<(), BatchError>;

    fn rollback(&self) -> Result<(), BatchError>;
}

/// Transaction manager for sinks without transactional resources, such as a log.
#[derive(Default)]
pub struct ResourcelessTransactionManager;

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        Ok(())
    }
}
