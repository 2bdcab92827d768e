use sqlx::AnyPool;

use crate::{
    BatchError,
    core::{
        item::ItemWriter,
        job::{Job, JobBuilder, JobExecution, JobParameters},
        repository::JobRepository,
        step::StepBuilder,
    },
    item::{
        logger::LoggerWriter,
        rdbc::{Order, PagingQueryProvider, RdbcPagingItemReaderBuilder},
    },
};

use super::{
    BatchSettings, JDBC_PAGING_JOB,
    pay::{Pay, PayRowMapper},
};

fn query_provider() -> PagingQueryProvider {
    PagingQueryProvider::new()
        .select_clause("id, amount, tx_name, tx_date_time")
        .from_clause("from pay")
        .where_clause("where amount >= :amount")
        .sort_key("id", Order::Ascending)
}

/// Minimum amount from the `amount` job parameter, or from the settings.
fn min_amount(settings: &BatchSettings, parameters: &JobParameters) -> Result<i64, BatchError> {
    match parameters.get("amount") {
        Some(amount) => amount.parse().map_err(|_| {
            BatchError::Configuration(format!("amount parameter is not a number: {}", amount))
        }),
        None => Ok(settings.min_amount),
    }
}

/// Logs every pay of at least the minimum amount, a page of sorted ids at a time.
pub fn run(
    pool: &AnyPool,
    settings: &BatchSettings,
    parameters: &JobParameters,
    repository: &dyn JobRepository,
) -> Result<JobExecution, BatchError> {
    let writer = LoggerWriter::new("Current Pay");
    run_with_writer(pool, settings, parameters, repository, &writer)
}

pub fn run_with_writer(
    pool: &AnyPool,
    settings: &BatchSettings,
    parameters: &JobParameters,
    repository: &dyn JobRepository,
    writer: &dyn ItemWriter<Pay>,
) -> Result<JobExecution, BatchError> {
    let row_mapper = PayRowMapper;

    let reader = RdbcPagingItemReaderBuilder::<Pay>::new()
        .name("jdbcPagingItemReader")
        .pool(pool)
        .query_provider(query_provider())
        .parameter_value("amount", min_amount(settings, parameters)?)
        .page_size(settings.paging_page_size)
        .row_mapper(&row_mapper)
        .build()?;

    let step = StepBuilder::new("jdbcPagingItemReaderStep")
        .chunk::<Pay, Pay>(settings.paging_chunk_size)
        .reader(&reader)
        .writer(writer)
        .build()?;

    let job = JobBuilder::new()
        .name(JDBC_PAGING_JOB.to_string())
        .start(&step)
        .repository(repository)
        .build();

    job.run(parameters)
}
