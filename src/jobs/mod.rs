//! Jobs over the `pay` table.
//!
//! | Job                       | Reader                                   | Processor          | Restart   |
//! |---------------------------|------------------------------------------|--------------------|-----------|
//! | `processorNullBatch`      | offset paging, page size = chunk size    | drops even ids     | prevented |
//! | `jdbcCursorItemReaderJob` | cursor over the whole table, fetch size 10 | none             | allowed   |
//! | `jdbcPagingItemReaderJob` | keyset paging on `id`, `amount >= :amount` | none             | allowed   |

use sqlx::AnyPool;

use crate::{
    BatchError,
    core::{
        job::{JobExecution, JobParameters},
        repository::JobRepository,
    },
};

pub mod jdbc_cursor;
pub mod jdbc_paging;
pub mod pay;
pub mod processor_null;
pub mod settings;

pub use pay::{EvenIdFilterProcessor, Pay, PayBinder, PayRowMapper};
pub use settings::BatchSettings;

pub const PROCESSOR_NULL_JOB: &str = "processorNullBatch";
pub const JDBC_CURSOR_JOB: &str = "jdbcCursorItemReaderJob";
pub const JDBC_PAGING_JOB: &str = "jdbcPagingItemReaderJob";

pub const JOB_NAMES: [&str; 3] = [PROCESSOR_NULL_JOB, JDBC_CURSOR_JOB, JDBC_PAGING_JOB];

/// Runs the job called `job_name`, logging the pays it selects.
///
/// Must be called from a multi-threaded Tokio runtime.
pub fn run_job(
    job_name: &str,
    pool: &AnyPool,
    settings: &BatchSettings,
    parameters: &JobParameters,
    repository: &dyn JobRepository,
) -> Result<JobExecution, BatchError> {
    match job_name {
        PROCESSOR_NULL_JOB => processor_null::run(pool, settings, parameters, repository),
        JDBC_CURSOR_JOB => jdbc_cursor::run(pool, settings, parameters, repository),
        JDBC_PAGING_JOB => jdbc_paging::run(pool, settings, parameters, repository),
        _ => Err(BatchError::Configuration(format!(
            "unknown job {}, expected one of {}",
            job_name,
            JOB_NAMES.join(", ")
        ))),
    }
}
