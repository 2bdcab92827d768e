mod common;

use chunk_batch::{
    BatchError,
    core::{
        job::{BatchStatus, JobParameters},
        repository::InMemoryJobRepository,
    },
    jobs::{
        self, BatchSettings, JDBC_CURSOR_JOB, JDBC_PAGING_JOB, PROCESSOR_NULL_JOB, jdbc_cursor,
        jdbc_paging, processor_null,
    },
};
use common::{
    mocks::{MockPayWriter, flatten, recording_writer},
    pay_database,
};

#[tokio::test(flavor = "multi_thread")]
async fn processor_null_job_writes_only_odd_ids() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(10).await?;
    let (writer, chunks) = recording_writer();
    let repository = InMemoryJobRepository::new();

    let execution = processor_null::run_with_writer(
        &pool,
        &BatchSettings::default(),
        &JobParameters::new(),
        &repository,
        &writer,
    )?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(flatten(&chunks), vec![1, 3, 5, 7, 9]);

    let step = execution
        .get_step_execution("processorNullBatch_step")
        .unwrap();
    assert_eq!(step.read_count, 10);
    assert_eq!(step.filter_count, 5);
    assert_eq!(step.write_count, 5);
    assert_eq!(step.commit_count, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn processor_null_job_commits_one_chunk_per_page() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(10).await?;
    let (writer, chunks) = recording_writer();
    let mut settings = BatchSettings::default();
    settings.set_chunk_size(PROCESSOR_NULL_JOB, 3)?;

    let execution = processor_null::run_with_writer(
        &pool,
        &settings,
        &JobParameters::new(),
        &InMemoryJobRepository::new(),
        &writer,
    )?;

    // [1,2,3] [4,5,6] [7,8,9] [10], the last one filtered entirely
    assert_eq!(*chunks.lock().unwrap(), vec![vec![1, 3], vec![5], vec![7, 9]]);
    assert_eq!(execution.step_executions[0].commit_count, 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn processor_null_job_cannot_run_twice() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(10).await?;
    let repository = InMemoryJobRepository::new();
    let parameters = JobParameters::new().add("requestDate", "2024-01-01");

    let mut writer = MockPayWriter::new();
    writer.expect_write().times(1).returning(|_| Ok(()));

    processor_null::run_with_writer(
        &pool,
        &BatchSettings::default(),
        &parameters,
        &repository,
        &writer,
    )?;
    let second = processor_null::run_with_writer(
        &pool,
        &BatchSettings::default(),
        &parameters,
        &repository,
        &writer,
    );

    assert!(matches!(second, Err(BatchError::Restart(_))));
    assert_eq!(
        repository
            .get_job_executions(PROCESSOR_NULL_JOB, &parameters.identity())
            .len(),
        1
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_job_streams_every_pay() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(25).await?;
    let (writer, chunks) = recording_writer();

    let execution = jdbc_cursor::run_with_writer(
        &pool,
        &BatchSettings::default(),
        &JobParameters::new(),
        &InMemoryJobRepository::new(),
        &writer,
    )?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(flatten(&chunks).len(), 25);
    assert_eq!(
        chunks
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect::<Vec<_>>(),
        vec![10, 10, 5]
    );
    assert_eq!(execution.step_executions[0].commit_count, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn paging_job_keeps_pays_of_at_least_the_minimum_amount() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(12).await?;

    let (writer, chunks) = recording_writer();
    jdbc_paging::run_with_writer(
        &pool,
        &BatchSettings::default(),
        &JobParameters::new(),
        &InMemoryJobRepository::new(),
        &writer,
    )?;
    assert_eq!(flatten(&chunks), (4..=12).collect::<Vec<_>>());

    let (writer, chunks) = recording_writer();
    jdbc_paging::run_with_writer(
        &pool,
        &BatchSettings::default(),
        &JobParameters::new().add("amount", 4000),
        &InMemoryJobRepository::new(),
        &writer,
    )?;
    assert_eq!(flatten(&chunks), vec![8, 9, 10, 11, 12]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn jobs_complete_on_an_empty_table() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(0).await?;
    let settings = BatchSettings::default();
    let repository = InMemoryJobRepository::new();

    for job_name in jobs::JOB_NAMES {
        let execution = jobs::run_job(
            job_name,
            &pool,
            &settings,
            &JobParameters::new(),
            &repository,
        )?;

        assert_eq!(execution.status, BatchStatus::Completed, "{}", job_name);
        let step = &execution.step_executions[0];
        assert_eq!(step.commit_count, 0);
        assert_eq!(step.read_count, 0);
        assert_eq!(step.rollback_count, 0);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn run_job_dispatches_by_name() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(10).await?;
    let settings = BatchSettings::default();
    let repository = InMemoryJobRepository::new();

    let cursor = jobs::run_job(
        JDBC_CURSOR_JOB,
        &pool,
        &settings,
        &JobParameters::new(),
        &repository,
    )?;
    assert_eq!(cursor.job_name, JDBC_CURSOR_JOB);
    assert_eq!(cursor.step_executions[0].write_count, 10);

    let paging = jobs::run_job(
        JDBC_PAGING_JOB,
        &pool,
        &settings,
        &JobParameters::new(),
        &repository,
    )?;
    assert_eq!(paging.step_executions[0].write_count, 7);

    let unknown = jobs::run_job(
        "someOtherJob",
        &pool,
        &settings,
        &JobParameters::new(),
        &repository,
    );
    assert!(matches!(unknown, Err(BatchError::Configuration(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn seeding_splits_large_inserts_under_the_bind_limit() -> anyhow::Result<()> {
    let (_file, pool) = pay_database(9000).await?;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pay")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 9000);

    let (writer, chunks) = recording_writer();
    let mut settings = BatchSettings::default();
    settings.set_chunk_size(JDBC_CURSOR_JOB, 1000)?;
    jdbc_cursor::run_with_writer(
        &pool,
        &settings,
        &JobParameters::new(),
        &InMemoryJobRepository::new(),
        &writer,
    )?;
    let mut ids = flatten(&chunks);
    ids.sort_unstable();
    assert_eq!(ids, (1..=9000).collect::<Vec<_>>());
    Ok(())
}
