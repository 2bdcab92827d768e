use std::{collections::BTreeMap, future::Future};

use serde::{Deserialize, Serialize};
use sqlx::{
    Any, AnyPool, Row, ValueRef,
    any::{AnyArguments, AnyPoolOptions, AnyRow, install_default_drivers},
    query::Query,
    query_builder::Separated,
};

use crate::BatchError;

/// This module contains the cursor reader implementation.
pub mod cursor_reader;

/// This module contains the paging reader implementation.
pub mod paging_reader;

/// This module contains the sort key based paging query provider.
pub mod query_provider;

/// This module contains the transaction manager bound to a connection pool.
pub mod transaction;

/// This module contains the database writer implementation.
pub mod writer;

pub use cursor_reader::{RdbcCursorItemReader, RdbcCursorItemReaderBuilder};
pub use paging_reader::{RdbcPagingItemReader, RdbcPagingItemReaderBuilder};
pub use query_provider::{Order, PagingQueryProvider};
pub use transaction::RdbcTransactionManager;
pub use writer::{RdbcItemWriter, RdbcItemWriterBuilder};

/// A value bound to a query parameter or read back from a sort key column.
///
/// Only the types understood by every `sqlx::Any` driver are represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

impl SqlValue {
    /// Reads column `column` of `row` as the first type it decodes to.
    pub fn from_row(row: &AnyRow, column: &str) -> Result<Self, BatchError> {
        if row.try_get_raw(column)?.is_null() {
            return Ok(SqlValue::Null);
        }
        if let Ok(value) = row.try_get::<i64, _>(column) {
            return Ok(SqlValue::Integer(value));
        }
        if let Ok(value) = row.try_get::<f64, _>(column) {
            return Ok(SqlValue::Real(value));
        }
        if let Ok(value) = row.try_get::<String, _>(column) {
            return Ok(SqlValue::Text(value));
        }
        Ok(SqlValue::Bool(row.try_get::<bool, _>(column)?))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(value.into())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// Maps one result row to an item.
pub trait RowMapper<T> {
    fn map_row(&self, row: &AnyRow) -> Result<T, BatchError>;
}

/// Binds the columns of an item to one row of a bulk `INSERT`.
///
/// # Examples
///
/// ```
/// use chunk_batch::item::rdbc::ItemBinder;
/// use sqlx::{Any, query_builder::Separated};
///
/// struct Account {
///     id: i64,
///     owner: String,
/// }
///
/// struct AccountBinder;
///
/// impl ItemBinder<Account> for AccountBinder {
///     fn bind(&self, item: &Account, mut query_builder: Separated<Any, &str>) {
///         query_builder.push_bind(item.id);
///         query_builder.push_bind(item.owner.clone());
///     }
/// }
/// ```
pub trait ItemBinder<O> {
    fn bind(&self, item: &O, query_builder: Separated<Any, &str>);
}

/// Connects a pool through the `Any` driver, installing the compiled-in drivers first.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<AnyPool, BatchError> {
    install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Runs a database future to completion from synchronous step code.
///
/// Needs a multi-threaded Tokio runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

pub(crate) fn bind_values<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Any, AnyArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(Option::<i64>::None),
            SqlValue::Integer(value) => query.bind(*value),
            SqlValue::Real(value) => query.bind(*value),
            SqlValue::Bool(value) => query.bind(*value),
            SqlValue::Text(value) => query.bind(value.clone()),
        };
    }
    query
}

/// Rewrites `:name` parameters to positional `$n` placeholders.
///
/// Numbering starts at `first_index`; a name used twice keeps its number. Text between
/// single quotes and `::` casts are copied unchanged.
///
/// # Returns
/// The rewritten statement and the values to bind, in placeholder order.
pub fn substitute_named_parameters(
    sql: &str,
    parameter_values: &BTreeMap<String, SqlValue>,
    first_index: usize,
) -> Result<(String, Vec<SqlValue>), BatchError> {
    let mut rewritten = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut values = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        if in_literal {
            rewritten.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_literal = true;
                rewritten.push(c);
            }
            ':' if chars.peek() == Some(&':') => {
                rewritten.push_str("::");
                chars.next();
            }
            ':' if chars
                .peek()
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_') =>
            {
                let mut name = String::new();
                while let Some(next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '_' {
                        name.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }

                let position = match names.iter().position(|known| *known == name) {
                    Some(position) => position,
                    None => {
                        let value = parameter_values.get(&name).ok_or_else(|| {
                            BatchError::Configuration(format!(
                                "no value for parameter :{} in {}",
                                name, sql
                            ))
                        })?;
                        values.push(value.clone());
                        names.push(name);
                        names.len() - 1
                    }
                };
                rewritten.push_str(&format!("${}", first_index + position));
            }
            _ => rewritten.push(c),
        }
    }

    Ok((rewritten, values))
}
