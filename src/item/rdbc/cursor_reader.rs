use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
};

use futures::TryStreamExt;
use log::{debug, warn};
use sqlx::{AnyPool, any::AnyRow};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    BatchError,
    core::item::{ExecutionContext, ItemReader, ItemReaderResult},
};

use super::{RowMapper, SqlValue, bind_values, block_on, substitute_named_parameters};

type RowBatch = Result<Vec<AnyRow>, sqlx::Error>;

struct Cursor {
    receiver: mpsc::Receiver<RowBatch>,
    task: JoinHandle<()>,
}

/// Reader streaming the rows of a single query kept open for the whole step.
///
/// The query runs in a background task owning one pooled connection. Rows are handed
/// over `fetch_size` at a time through a bounded channel, so at most two batches are held
/// in memory. The connection goes back to the pool when the result set is exhausted or
/// the reader is closed. Once the query has failed, every later `read` fails too, until
/// the reader is opened again.
pub struct RdbcCursorItemReader<'a, T> {
    name: String,
    pool: AnyPool,
    sql: String,
    values: Vec<SqlValue>,
    fetch_size: usize,
    row_mapper: &'a dyn RowMapper<T>,
    cursor: RefCell<Option<Cursor>>,
    buffer: RefCell<VecDeque<AnyRow>>,
    exhausted: Cell<bool>,
    failure: RefCell<Option<String>>,
    /// Rows consumed by `read`, mapped or not
    read_count: Cell<usize>,
}

impl<T> RdbcCursorItemReader<'_, T> {
    fn read_count_key(&self) -> String {
        format!("{}.read.count", self.name)
    }

    fn open_cursor(&self) {
        let (sender, receiver) = mpsc::channel::<RowBatch>(1);
        let pool = self.pool.clone();
        let sql = self.sql.clone();
        let values = self.values.clone();
        let fetch_size = self.fetch_size;

        let task = tokio::spawn(async move {
            let query = bind_values(sqlx::query(&sql), &values);
            let mut rows = query.fetch(&pool);
            let mut batch = Vec::with_capacity(fetch_size);

            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        batch.push(row);
                        if batch.len() == fetch_size {
                            let full = std::mem::replace(&mut batch, Vec::with_capacity(fetch_size));
                            if sender.send(Ok(full)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        if !batch.is_empty() {
                            let _ = sender.send(Ok(batch)).await;
                        }
                        return;
                    }
                    Err(error) => {
                        let _ = sender.send(Err(error)).await;
                        return;
                    }
                }
            }
        });

        debug!("Cursor opened for reader {}: {}", self.name, self.sql);
        *self.cursor.borrow_mut() = Some(Cursor { receiver, task });
        self.exhausted.set(false);
        *self.failure.borrow_mut() = None;
    }

    fn close_cursor(&self) {
        if let Some(cursor) = self.cursor.borrow_mut().take() {
            cursor.task.abort();
        }
        self.buffer.borrow_mut().clear();
    }

    /// Waits for the next batch of rows; `false` once the result set is exhausted.
    fn fetch(&self) -> Result<bool, BatchError> {
        if let Some(failure) = self.failure.borrow().as_ref() {
            return Err(BatchError::DataAccess(failure.clone()));
        }
        if self.exhausted.get() {
            return Ok(false);
        }
        if self.cursor.borrow().is_none() {
            self.open_cursor();
        }

        let batch = {
            let mut cursor = self.cursor.borrow_mut();
            match cursor.as_mut() {
                Some(cursor) => block_on(cursor.receiver.recv()),
                None => None,
            }
        };

        match batch {
            Some(Ok(rows)) => {
                self.buffer.borrow_mut().extend(rows);
                Ok(true)
            }
            Some(Err(error)) => {
                let error = BatchError::from(error);
                *self.failure.borrow_mut() =
                    Some(format!("cursor of reader {} failed: {}", self.name, error));
                self.close_cursor();
                Err(error)
            }
            None => {
                debug!("Cursor of reader {} exhausted", self.name);
                self.exhausted.set(true);
                self.close_cursor();
                Ok(false)
            }
        }
    }

    fn next_row(&self) -> Result<Option<AnyRow>, BatchError> {
        loop {
            if let Some(row) = self.buffer.borrow_mut().pop_front() {
                return Ok(Some(row));
            }
            if !self.fetch()? {
                return Ok(None);
            }
        }
    }
}

impl<T> ItemReader<T> for RdbcCursorItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        match self.next_row()? {
            Some(row) => {
                self.read_count.set(self.read_count.get() + 1);
                self.row_mapper.map_row(&row).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Opens the cursor and moves it past the rows consumed before the last commit.
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.close_cursor();
        self.read_count.set(0);
        self.open_cursor();

        let restored = context.get_usize(&self.read_count_key()).unwrap_or(0);
        for _ in 0..restored {
            if self.next_row()?.is_none() {
                warn!(
                    "Reader {} restored at row {} but the cursor ended before it",
                    self.name, restored
                );
                break;
            }
        }
        self.read_count.set(restored);
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.read_count_key(), self.read_count.get());
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.close_cursor();
        Ok(())
    }
}

impl<T> Drop for RdbcCursorItemReader<'_, T> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.get_mut().take() {
            cursor.task.abort();
        }
    }
}

pub struct RdbcCursorItemReaderBuilder<'a, T> {
    name: String,
    pool: Option<AnyPool>,
    sql: Option<String>,
    parameter_values: BTreeMap<String, SqlValue>,
    fetch_size: usize,
    row_mapper: Option<&'a dyn RowMapper<T>>,
}

impl<T> Default for RdbcCursorItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> RdbcCursorItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            name: "cursorReader".to_string(),
            pool: None,
            sql: None,
            parameter_values: BTreeMap::new(),
            fetch_size: 100,
            row_mapper: None,
        }
    }

    /// Prefix of the keys this reader stores in the execution context.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn pool(mut self, pool: &AnyPool) -> Self {
        self.pool = Some(pool.clone());
        self
    }

    pub fn sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }

    pub fn parameter_value(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.parameter_values.insert(name.to_string(), value.into());
        self
    }

    pub fn parameter_values(mut self, parameter_values: BTreeMap<String, SqlValue>) -> Self {
        self.parameter_values.extend(parameter_values);
        self
    }

    /// Number of rows transferred from the database at a time.
    pub fn fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> Result<RdbcCursorItemReader<'a, T>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("a pool is required".to_string()))?;
        let sql = self
            .sql
            .ok_or_else(|| BatchError::Configuration("a query is required".to_string()))?;
        let row_mapper = self
            .row_mapper
            .ok_or_else(|| BatchError::Configuration("a row mapper is required".to_string()))?;
        if self.fetch_size == 0 {
            return Err(BatchError::Configuration(
                "fetch size must be at least 1".to_string(),
            ));
        }
        if !sql.to_ascii_lowercase().contains("order by") {
            warn!(
                "Query of reader {} has no ORDER BY, a restart may skip or repeat rows",
                self.name
            );
        }

        let (sql, values) = substitute_named_parameters(&sql, &self.parameter_values, 1)?;

        Ok(RdbcCursorItemReader {
            name: self.name,
            pool,
            sql,
            values,
            fetch_size: self.fetch_size,
            row_mapper,
            cursor: RefCell::new(None),
            buffer: RefCell::new(VecDeque::new()),
            exhausted: Cell::new(false),
            failure: RefCell::new(None),
            read_count: Cell::new(0),
        })
    }
}
