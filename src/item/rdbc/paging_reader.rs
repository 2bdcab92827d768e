use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
};

use log::debug;
use sqlx::AnyPool;

use crate::{
    BatchError,
    core::item::{ExecutionContext, ItemReader, ItemReaderResult},
};

use super::{
    PagingQueryProvider, RowMapper, SqlValue, bind_values, block_on, substitute_named_parameters,
};

enum PagingStrategy {
    /// Pages restart after the sort key values of the last row read.
    Keyset(PagingQueryProvider),
    /// Pages are taken with `LIMIT … OFFSET …` over an ordered query.
    Offset { sql: String, values: Vec<SqlValue> },
}

/// A fetched row: the mapped item, or the mapping error, with its sort key values.
type PageRow<T> = (Result<T, BatchError>, Vec<SqlValue>);

/// Reader fetching its rows one bounded query at a time.
///
/// One page of `page_size` rows is buffered and the next one is queried once it has been
/// consumed. A page shorter than `page_size` ends the stream without another query.
/// A row that fails to map is returned as an error at its own position; the rows after
/// it stay buffered.
pub struct RdbcPagingItemReader<'a, T> {
    name: String,
    pool: AnyPool,
    strategy: PagingStrategy,
    parameter_values: BTreeMap<String, SqlValue>,
    page_size: usize,
    row_mapper: &'a dyn RowMapper<T>,
    buffer: RefCell<VecDeque<PageRow<T>>>,
    last_read_key: RefCell<Option<Vec<SqlValue>>>,
    /// Rows handed out by `read`, mapped or not
    read_count: Cell<usize>,
    /// Rows already fetched from the database
    fetched_count: Cell<usize>,
    exhausted: Cell<bool>,
}

impl<T> RdbcPagingItemReader<'_, T> {
    fn read_count_key(&self) -> String {
        format!("{}.read.count", self.name)
    }

    fn start_after_key(&self) -> String {
        format!("{}.start.after", self.name)
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self) -> Result<(), BatchError> {
        let (sql, values) = match &self.strategy {
            PagingStrategy::Keyset(provider) => {
                let last_read_key = self.last_read_key.borrow();
                provider.page_query(
                    &self.parameter_values,
                    last_read_key.as_deref(),
                    self.page_size,
                )?
            }
            PagingStrategy::Offset { sql, values } => (
                format!(
                    "{} LIMIT {} OFFSET {}",
                    sql,
                    self.page_size,
                    self.fetched_count.get()
                ),
                values.clone(),
            ),
        };

        debug!("Reader {} reads page: {}", self.name, sql);

        let query = bind_values(sqlx::query(&sql), &values);
        let rows = block_on(query.fetch_all(&self.pool))?;

        // sort keys first: without them the next page cannot be positioned
        let keys = match &self.strategy {
            PagingStrategy::Keyset(provider) => rows
                .iter()
                .map(|row| provider.sort_key_values(row))
                .collect::<Result<Vec<_>, _>>()?,
            PagingStrategy::Offset { .. } => vec![Vec::new(); rows.len()],
        };

        let mut buffer = self.buffer.borrow_mut();
        for (row, key) in rows.iter().zip(keys) {
            buffer.push_back((self.row_mapper.map_row(row), key));
        }

        if rows.len() < self.page_size {
            self.exhausted.set(true);
        }
        self.fetched_count.set(self.fetched_count.get() + rows.len());
        Ok(())
    }
}

impl<T> ItemReader<T> for RdbcPagingItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        if self.buffer.borrow().is_empty() {
            if self.exhausted.get() {
                return Ok(None);
            }
            self.read_page()?;
        }

        let next = self.buffer.borrow_mut().pop_front();
        match next {
            Some((item, key)) => {
                self.read_count.set(self.read_count.get() + 1);
                if !key.is_empty() {
                    *self.last_read_key.borrow_mut() = Some(key);
                }
                item.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Resets the reader, then positions it after the last committed item if the
    /// context holds a checkpoint of this reader.
    fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
        self.buffer.borrow_mut().clear();
        self.exhausted.set(false);

        let read_count = context.get_usize(&self.read_count_key()).unwrap_or(0);
        let last_read_key: Option<Vec<SqlValue>> = context.get(&self.start_after_key())?;

        if read_count > 0 {
            debug!(
                "Reader {} resumes after {} item(s), key {:?}",
                self.name, read_count, last_read_key
            );
        }

        self.read_count.set(read_count);
        self.fetched_count.set(read_count);
        *self.last_read_key.borrow_mut() = last_read_key;
        Ok(())
    }

    fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
        context.put_usize(&self.read_count_key(), self.read_count.get());
        if let Some(key) = self.last_read_key.borrow().as_ref() {
            context.put(&self.start_after_key(), key)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.buffer.borrow_mut().clear();
        Ok(())
    }
}

pub struct RdbcPagingItemReaderBuilder<'a, T> {
    name: String,
    pool: Option<AnyPool>,
    query_provider: Option<PagingQueryProvider>,
    sql: Option<String>,
    parameter_values: BTreeMap<String, SqlValue>,
    page_size: usize,
    row_mapper: Option<&'a dyn RowMapper<T>>,
}

impl<T> Default for RdbcPagingItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> RdbcPagingItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            name: "pagingReader".to_string(),
            pool: None,
            query_provider: None,
            sql: None,
            parameter_values: BTreeMap::new(),
            page_size: 10,
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

    /// Pages with sort key predicates built by `query_provider`.
    pub fn query_provider(mut self, query_provider: PagingQueryProvider) -> Self {
        self.query_provider = Some(query_provider);
        self
    }

    /// Pages with `LIMIT`/`OFFSET` over `sql`, which must end with an `ORDER BY`.
    pub fn sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.trim().trim_end_matches(';').to_string());
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

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> Result<RdbcPagingItemReader<'a, T>, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("a pool is required".to_string()))?;
        let row_mapper = self
            .row_mapper
            .ok_or_else(|| BatchError::Configuration("a row mapper is required".to_string()))?;
        if self.page_size == 0 {
            return Err(BatchError::Configuration(
                "page size must be at least 1".to_string(),
            ));
        }

        let strategy = match (self.query_provider, self.sql) {
            (Some(provider), None) => {
                provider.validate()?;
                // fails early on a missing parameter value
                provider.page_query(&self.parameter_values, None, self.page_size)?;
                PagingStrategy::Keyset(provider)
            }
            (None, Some(sql)) => {
                if !sql.to_ascii_lowercase().contains("order by") {
                    return Err(BatchError::Configuration(format!(
                        "paging query of reader {} needs an ORDER BY sort key: {}",
                        self.name, sql
                    )));
                }
                let (sql, values) = substitute_named_parameters(&sql, &self.parameter_values, 1)?;
                PagingStrategy::Offset { sql, values }
            }
            (Some(_), Some(_)) => {
                return Err(BatchError::Configuration(
                    "set either a query provider or a query, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(BatchError::Configuration(
                    "a query provider or a query is required".to_string(),
                ));
            }
        };

        Ok(RdbcPagingItemReader {
            name: self.name,
            pool,
            strategy,
            parameter_values: self.parameter_values,
            page_size: self.page_size,
            row_mapper,
            buffer: RefCell::new(VecDeque::with_capacity(self.page_size)),
            last_read_key: RefCell::new(None),
            read_count: Cell::new(0),
            fetched_count: Cell::new(0),
            exhausted: Cell::new(false),
        })
    }
}
