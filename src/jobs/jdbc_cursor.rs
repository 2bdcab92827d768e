use sqlx::AnyPool;

use crate::{
    BatchError,
    core::{
        item::ItemWriter,
        job::{Job, JobBuilder, JobExecution, JobParameters},
        repository::JobRepository,
        step::StepBuilder,
    },
    item::{logger::LoggerWriter, rdbc::RdbcCursorItemReaderBuilder},
};

use super::{
    BatchSettings, JDBC_CURSOR_JOB,
    pay::{Pay, PayRowMapper},
};

const QUERY: &str = "SELECT id, amount, tx_name, tx_date_time FROM pay";

/// Streams every pay through one cursor and logs it.
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

    let reader = RdbcCursorItemReaderBuilder::<Pay>::new()
        .name("jdbcCursorItemReader")
        .pool(pool)
        .sql(QUERY)
        .fetch_size(settings.cursor_fetch_size)
        .row_mapper(&row_mapper)
        .build()?;

    let step = StepBuilder::new("jdbcCursorItemReaderStep")
        .chunk::<Pay, Pay>(settings.cursor_chunk_size)
        .reader(&reader)
        .writer(writer)
        .build()?;

    let job = JobBuilder::new()
        .name(JDBC_CURSOR_JOB.to_string())
        .start(&step)
        .repository(repository)
        .build();

    job.run(parameters)
}
