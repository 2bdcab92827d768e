use chrono::{DateTime, NaiveDateTime};
use log::info;
use serde::{Deserialize, Serialize};
use sqlx::{
    Any, AnyPool, QueryBuilder, Row,
    any::AnyRow,
    query_builder::Separated,
};

use crate::{
    BatchError,
    core::item::{ItemProcessor, ItemProcessorResult},
    item::rdbc::{ItemBinder, RowMapper, writer::BIND_LIMIT},
};

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns of the `pay` table, in select and insert order.
pub const PAY_COLUMNS: [&str; 4] = ["id", "amount", "tx_name", "tx_date_time"];

/// Timestamps are stored as text so that every `Any` driver can decode them.
pub const PAY_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS pay (\
    id BIGINT PRIMARY KEY, \
    amount BIGINT NOT NULL, \
    tx_name VARCHAR(255) NOT NULL, \
    tx_date_time VARCHAR(32) NOT NULL)";

/// A payment transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pay {
    pub id: i64,
    pub amount: i64,
    pub tx_name: String,
    pub tx_date_time: NaiveDateTime,
}

impl Pay {
    pub fn new(id: i64, amount: i64, tx_name: &str, tx_date_time: NaiveDateTime) -> Self {
        Self {
            id,
            amount,
            tx_name: tx_name.to_string(),
            tx_date_time,
        }
    }
}

fn parse_date_time(value: &str) -> Result<NaiveDateTime, BatchError> {
    NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|error| {
            BatchError::DataAccess(format!("invalid tx_date_time {:?}: {}", value, error))
        })
}

#[derive(Default)]
pub struct PayRowMapper;

impl RowMapper<Pay> for PayRowMapper {
    fn map_row(&self, row: &AnyRow) -> Result<Pay, BatchError> {
        let tx_date_time: String = row.try_get("tx_date_time")?;
        Ok(Pay {
            id: row.try_get("id")?,
            amount: row.try_get("amount")?,
            tx_name: row.try_get("tx_name")?,
            tx_date_time: parse_date_time(&tx_date_time)?,
        })
    }
}

#[derive(Default)]
pub struct PayBinder;

impl ItemBinder<Pay> for PayBinder {
    fn bind(&self, item: &Pay, mut query_builder: Separated<Any, &str>) {
        query_builder.push_bind(item.id);
        query_builder.push_bind(item.amount);
        query_builder.push_bind(item.tx_name.clone());
        query_builder.push_bind(item.tx_date_time.format(DATE_TIME_FORMAT).to_string());
    }
}

/// Drops every pay with an even id, logging each dropped one.
#[derive(Default)]
pub struct EvenIdFilterProcessor;

impl ItemProcessor<Pay, Pay> for EvenIdFilterProcessor {
    fn process(&self, item: &Pay) -> ItemProcessorResult<Pay> {
        if item.id % 2 == 0 {
            info!("Pay name={}, id={}, ignored", item.tx_name, item.id);
            return Ok(None);
        }
        Ok(Some(item.clone()))
    }
}

/// Pays `1..=count`: amount `500 * id`, one hour apart from 2024-01-01.
pub fn sample_pays(count: i64) -> Vec<Pay> {
    (1..=count)
        .map(|id| {
            Pay::new(
                id,
                500 * id,
                &format!("trade{}", id),
                sample_date_time(id),
            )
        })
        .collect()
}

/// `id` hours after 2024-01-01 00:00:00, saturating at the latest representable instant.
fn sample_date_time(id: i64) -> NaiveDateTime {
    id.checked_mul(3600)
        .and_then(|seconds| seconds.checked_add(1_704_067_200))
        .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0))
        .map_or(NaiveDateTime::MAX, |date_time| date_time.naive_utc())
}

pub async fn create_schema(pool: &AnyPool) -> Result<(), BatchError> {
    sqlx::query(PAY_SCHEMA).execute(pool).await?;
    Ok(())
}

/// Inserts `pays` outside of any step, for seeding a database.
pub async fn insert_pays(pool: &AnyPool, pays: &[Pay]) -> Result<(), BatchError> {
    if pays.is_empty() {
        return Ok(());
    }
    let binder = PayBinder;
    for rows in pays.chunks(BIND_LIMIT / PAY_COLUMNS.len()) {
        let mut query_builder = QueryBuilder::<Any>::new("INSERT INTO pay (");
        query_builder.push(PAY_COLUMNS.join(", "));
        query_builder.push(") ");
        query_builder.push_values(rows, |b, pay| binder.bind(pay, b));
        query_builder.build().execute(pool).await?;
    }
    info!("Inserted {} pays", pays.len());
    Ok(())
}
