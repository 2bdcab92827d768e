use sqlx::AnyPool;

use crate::{
    BatchError,
    core::{
        item::ItemWriter,
        job::{Job, JobBuilder, JobExecution, JobParameters},
        repository::JobRepository,
        step::StepBuilder,
    },
    item::{logger::LoggerWriter, rdbc::RdbcPagingItemReaderBuilder},
};

use super::{
    BatchSettings, PROCESSOR_NULL_JOB,
    pay::{EvenIdFilterProcessor, Pay, PayRowMapper},
};

const QUERY: &str = "SELECT id, amount, tx_name, tx_date_time FROM pay ORDER BY id";

/// Logs every pay with an odd id. The job runs at most once per parameter set.
pub fn run(
    pool: &AnyPool,
    settings: &BatchSettings,
    parameters: &JobParameters,
    repository: &dyn JobRepository,
) -> Result<JobExecution, BatchError> {
    let writer = LoggerWriter::new("Pay");
    run_with_writer(pool, settings, parameters, repository, &writer)
}

pub fn run_with_writer(
    pool: &AnyPool,
    settings: &BatchSettings,
    parameters: &JobParameters,
    repository: &dyn JobRepository,
    writer: &dyn ItemWriter<Pay>,
) -> Result<JobExecution, BatchError> {
    let chunk_size = settings.processor_null_chunk_size;
    let row_mapper = PayRowMapper;

    let reader = RdbcPagingItemReaderBuilder::<Pay>::new()
        .name(&format!("{}_reader", PROCESSOR_NULL_JOB))
        .pool(pool)
        .sql(QUERY)
        .page_size(chunk_size)
        .row_mapper(&row_mapper)
        .build()?;

    let processor = EvenIdFilterProcessor;

    let step = StepBuilder::new(&format!("{}_step", PROCESSOR_NULL_JOB))
        .chunk::<Pay, Pay>(chunk_size)
        .reader(&reader)
        .processor(&processor)
        .writer(writer)
        .build()?;

    let job = JobBuilder::new()
        .name(PROCESSOR_NULL_JOB.to_string())
        .start(&step)
        .prevent_restart()
        .repository(repository)
        .build();

    job.run(parameters)
}
