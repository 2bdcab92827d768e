#![allow(dead_code)]

pub mod mocks;

use chunk_batch::{
    core::item::{ExecutionContext, ItemReader},
    item::rdbc::connect,
    jobs::pay::{self, Pay},
};
use sqlx::AnyPool;
use tempfile::NamedTempFile;

/// SQLite database in a temporary file holding `count` sample pays.
///
/// The file must outlive the pool.
pub async fn pay_database(count: i64) -> anyhow::Result<(NamedTempFile, AnyPool)> {
    let _ = env_logger::builder().is_test(true).try_init();

    let database_file = NamedTempFile::new()?;
    let connection_uri = format!("sqlite://{}", database_file.path().display());

    let pool = connect(&connection_uri, 5).await?;
    sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
    pay::create_schema(&pool).await?;
    pay::insert_pays(&pool, &pay::sample_pays(count)).await?;

    Ok((database_file, pool))
}

/// Creates an empty `pay_copy` table shaped like `pay`.
pub async fn create_copy_table(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(&pay::PAY_SCHEMA.replace("pay (", "pay_copy ("))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn copied_ids(pool: &AnyPool) -> anyhow::Result<Vec<i64>> {
    let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM pay_copy ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Stores a timestamp `PayRowMapper` cannot parse on pay `id`.
pub async fn corrupt_date_time(pool: &AnyPool, id: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE pay SET tx_date_time = 'garbage' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Opens `reader` on an empty context and drains it.
pub fn read_ids(reader: &dyn ItemReader<Pay>) -> anyhow::Result<Vec<i64>> {
    reader.open(&ExecutionContext::new())?;
    let mut ids = Vec::new();
    while let Some(pay) = reader.read()? {
        ids.push(pay.id);
    }
    reader.close()?;
    Ok(ids)
}
