use std::cell::{RefCell, RefMut};

use log::debug;
use sqlx::{Any, AnyPool, Transaction};

use crate::{BatchError, core::transaction::TransactionManager};

use super::block_on;

/// Transaction manager opening one database transaction per chunk.
///
/// Writers built with this manager execute their statements on the open transaction,
/// so a rollback discards everything the chunk wrote.
pub struct RdbcTransactionManager {
    pool: AnyPool,
    transaction: RefCell<Option<Transaction<'static, Any>>>,
}

impl RdbcTransactionManager {
    pub fn new(pool: &AnyPool) -> Self {
        Self {
            pool: pool.clone(),
            transaction: RefCell::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.transaction.borrow().is_some()
    }

    pub(crate) fn transaction(&self) -> RefMut<'_, Option<Transaction<'static, Any>>> {
        self.transaction.borrow_mut()
    }

    fn take(&self) -> Result<Transaction<'static, Any>, BatchError> {
        self.transaction
            .borrow_mut()
            .take()
            .ok_or_else(|| BatchError::Transaction("no active transaction".to_string()))
    }
}

impl TransactionManager for RdbcTransactionManager {
    fn begin(&self) -> Result<(), BatchError> {
        if self.is_active() {
            return Err(BatchError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        let transaction = block_on(self.pool.begin())
            .map_err(|error| BatchError::Transaction(error.to_string()))?;
        *self.transaction.borrow_mut() = Some(transaction);
        debug!("Transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        let transaction = self.take()?;
        block_on(transaction.commit()).map_err(|error| BatchError::Transaction(error.to_string()))?;
        debug!("Transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        let transaction = self.take()?;
        block_on(transaction.rollback())
            .map_err(|error| BatchError::Transaction(error.to_string()))?;
        debug!("Transaction rolled back");
        Ok(())
    }
}
