use std::collections::BTreeMap;

use sqlx::any::AnyRow;

use crate::BatchError;

use super::{SqlValue, substitute_named_parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    fn keyword(self) -> &'static str {
        match self {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        }
    }

    fn after(self) -> &'static str {
        match self {
            Order::Ascending => ">",
            Order::Descending => "<",
        }
    }
}

/// Builds the page queries of a keyset paging reader.
///
/// The first page is `SELECT … FROM … [WHERE …] ORDER BY keys LIMIT n`. Every following
/// page restarts strictly after the sort key values of the last row read, so the sort keys
/// must together be unique.
///
/// ```
/// use chunk_batch::item::rdbc::{Order, PagingQueryProvider};
///
/// let provider = PagingQueryProvider::new()
///     .select_clause("id, amount, tx_name, tx_date_time")
///     .from_clause("FROM pay")
///     .where_clause("amount >= :amount")
///     .sort_key("id", Order::Ascending);
/// assert!(provider.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PagingQueryProvider {
    select_clause: String,
    from_clause: String,
    where_clause: Option<String>,
    sort_keys: Vec<(String, Order)>,
}

fn strip_keyword<'s>(clause: &'s str, keyword: &str) -> &'s str {
    let clause = clause.trim();
    match clause.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => clause[keyword.len()..].trim_start(),
        _ => clause,
    }
}

impl PagingQueryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select_clause(mut self, select_clause: &str) -> Self {
        self.select_clause = strip_keyword(select_clause, "SELECT ").to_string();
        self
    }

    pub fn from_clause(mut self, from_clause: &str) -> Self {
        self.from_clause = strip_keyword(from_clause, "FROM ").to_string();
        self
    }

    /// Optional filter, may use `:name` parameters.
    pub fn where_clause(mut self, where_clause: &str) -> Self {
        self.where_clause = Some(strip_keyword(where_clause, "WHERE ").to_string());
        self
    }

    /// Appends a sort key. Keys are compared in the order they are added.
    pub fn sort_key(mut self, column: &str, order: Order) -> Self {
        self.sort_keys.push((column.to_string(), order));
        self
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.select_clause.is_empty() {
            return Err(BatchError::Configuration(
                "select clause is required".to_string(),
            ));
        }
        if self.from_clause.is_empty() {
            return Err(BatchError::Configuration("from clause is required".to_string()));
        }
        if self.sort_keys.is_empty() {
            return Err(BatchError::Configuration(
                "a sort key is required for paging".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sort_key_count(&self) -> usize {
        self.sort_keys.len()
    }

    /// Builds the query of the page following `start_after`, or of the first page.
    ///
    /// # Returns
    /// The statement with `$n` placeholders and the values to bind, in order.
    pub fn page_query(
        &self,
        parameter_values: &BTreeMap<String, SqlValue>,
        start_after: Option<&[SqlValue]>,
        page_size: usize,
    ) -> Result<(String, Vec<SqlValue>), BatchError> {
        let mut values = Vec::new();
        let mut predicates = Vec::new();

        if let Some(where_clause) = &self.where_clause {
            let (predicate, bound) = substitute_named_parameters(where_clause, parameter_values, 1)?;
            predicates.push(format!("({})", predicate));
            values.extend(bound);
        }

        if let Some(last_keys) = start_after {
            if last_keys.len() != self.sort_keys.len() {
                return Err(BatchError::Configuration(format!(
                    "expected {} sort key values, got {}",
                    self.sort_keys.len(),
                    last_keys.len()
                )));
            }
            let first_key_index = values.len() + 1;
            predicates.push(self.keyset_predicate(first_key_index));
            values.extend_from_slice(last_keys);
        }

        let mut sql = format!("SELECT {} FROM {}", self.select_clause, self.from_clause);
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(
            &self
                .sort_keys
                .iter()
                .map(|(column, order)| format!("{} {}", column, order.keyword()))
                .collect::<Vec<_>>()
                .join(", "),
        );
        sql.push_str(&format!(" LIMIT {}", page_size));

        Ok((sql, values))
    }

    /// `(k1 > $a) OR (k1 = $a AND k2 > $b) OR …`
    fn keyset_predicate(&self, first_index: usize) -> String {
        let alternatives = (0..self.sort_keys.len())
            .map(|last| {
                let mut terms: Vec<String> = self.sort_keys[..last]
                    .iter()
                    .enumerate()
                    .map(|(position, (column, _))| {
                        format!("{} = ${}", column, first_index + position)
                    })
                    .collect();
                let (column, order) = &self.sort_keys[last];
                terms.push(format!("{} {} ${}", column, order.after(), first_index + last));
                format!("({})", terms.join(" AND "))
            })
            .collect::<Vec<_>>();
        format!("({})", alternatives.join(" OR "))
    }

    /// Reads the sort key values of a row, to start the next page after it.
    pub fn sort_key_values(&self, row: &AnyRow) -> Result<Vec<SqlValue>, BatchError> {
        self.sort_keys
            .iter()
            .map(|(column, _)| {
                let label = column.rsplit('.').next().unwrap_or(column);
                SqlValue::from_row(row, label)
            })
            .collect()
    }
}
