use log::{debug, error};
use sqlx::{Any, QueryBuilder};

use crate::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
};

use super::{ItemBinder, RdbcTransactionManager, block_on};

/// Bind parameters per statement: SQLite's default limit, also below PostgreSQL's.
pub const BIND_LIMIT: usize = 32766;

/// Writer inserting items with bulk `INSERT … VALUES` statements.
///
/// Statements run on the transaction opened by the step's `RdbcTransactionManager`;
/// the writer never commits by itself.
pub struct RdbcItemWriter<'a, O> {
    table: String,
    columns: Vec<String>,
    item_binder: &'a dyn ItemBinder<O>,
    transaction_manager: &'a RdbcTransactionManager,
}

impl<O> ItemWriter<O> for RdbcItemWriter<'_, O> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        if items.is_empty() {
            return Ok(());
        }

        let mut transaction = self.transaction_manager.transaction();
        let connection = transaction.as_mut().ok_or_else(|| {
            BatchError::Transaction(format!(
                "writing to {} requires an active transaction",
                self.table
            ))
        })?;

        let rows_per_statement = (BIND_LIMIT / self.columns.len()).max(1);
        for rows in items.chunks(rows_per_statement) {
            let mut query_builder = QueryBuilder::<Any>::new("INSERT INTO ");
            query_builder.push(&self.table);
            query_builder.push(" (");
            query_builder.push(self.columns.join(", "));
            query_builder.push(") ");
            query_builder.push_values(rows, |b, item| {
                self.item_binder.bind(item, b);
            });

            let query = query_builder.build();
            block_on(query.execute(&mut **connection)).map_err(|e| {
                error!("Failed to write items to table {}: {}", self.table, e);
                BatchError::ItemWriter(format!("insert into {} failed: {}", self.table, e))
            })?;
        }

        debug!("Wrote {} items to table {}", items.len(), self.table);
        Ok(())
    }
}

pub struct RdbcItemWriterBuilder<'a, O> {
    table: Option<String>,
    columns: Vec<String>,
    item_binder: Option<&'a dyn ItemBinder<O>>,
    transaction_manager: Option<&'a RdbcTransactionManager>,
}

impl<O> Default for RdbcItemWriterBuilder<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O> RdbcItemWriterBuilder<'a, O> {
    pub fn new() -> Self {
        Self {
            table: None,
            columns: Vec::new(),
            item_binder: None,
            transaction_manager: None,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Adds a column; values are bound in the order columns are added.
    pub fn add_column(mut self, column: &str) -> Self {
        self.columns.push(column.to_string());
        self
    }

    pub fn item_binder(mut self, item_binder: &'a dyn ItemBinder<O>) -> Self {
        self.item_binder = Some(item_binder);
        self
    }

    /// The manager the step commits with; it must be the step's transaction manager.
    pub fn transaction_manager(mut self, transaction_manager: &'a RdbcTransactionManager) -> Self {
        self.transaction_manager = Some(transaction_manager);
        self
    }

    pub fn build(self) -> Result<RdbcItemWriter<'a, O>, BatchError> {
        let table = self
            .table
            .ok_or_else(|| BatchError::Configuration("a table is required".to_string()))?;
        if self.columns.is_empty() {
            return Err(BatchError::Configuration(format!(
                "at least one column is required to write to {}",
                table
            )));
        }
        let item_binder = self
            .item_binder
            .ok_or_else(|| BatchError::Configuration("an item binder is required".to_string()))?;
        let transaction_manager = self.transaction_manager.ok_or_else(|| {
            BatchError::Configuration("a transaction manager is required".to_string())
        })?;

        Ok(RdbcItemWriter {
            table,
            columns: self.columns,
            item_binder,
            transaction_manager,
        })
    }
}
