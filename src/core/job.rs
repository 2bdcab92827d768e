use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use log::{error, info};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    repository::{InMemoryJobRepository, JobRepository},
    step::{Step, StepExecution, StepStatus},
};

/// Type alias for job execution results.
///
/// A `JobResult` is a `Result` that contains either:
/// - A successful `JobExecution` with execution details
/// - A `BatchError` indicating what went wrong
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job is a container for a sequence of steps that are executed in order. The job
/// stops at the first failing step and reports its error.
pub trait Job {
    fn get_name(&self) -> &str;

    /// Runs the job for the given identifying parameters.
    ///
    /// # Returns
    /// - `Ok(JobExecution)` when every step completed, or a step stopped on request
    /// - `Err(BatchError::Restart)` when this job instance may not be run again
    /// - `Err(BatchError::Step)` when a step failed
    fn run(&self, parameters: &JobParameters) -> JobResult<JobExecution>;
}

/// Identifying parameters of a job run.
///
/// Two runs of the same job with equal parameters belong to the same job instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobParameters {
    parameters: BTreeMap<String, String>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, key: &str, value: impl ToString) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Stable textual identity, parameters sorted by key.
    pub fn identity(&self) -> String {
        self.parameters
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Status of a job prior to its execution.
    Starting,
    /// Status of a job that is running.
    Started,
    /// The job has successfully completed its execution.
    Completed,
    /// Status of a job that has been stopped by request.
    Stopped,
    /// Status of a job that has failed during its execution.
    Failed,
}

/// Represents the execution of a job.
#[derive(Debug, Clone)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    /// Identity of the job parameters this execution ran with
    pub identity: String,
    pub status: BatchStatus,
    /// The time when the job started executing
    pub start: Instant,
    /// The time when the job finished executing
    pub end: Instant,
    /// The total duration of the job execution
    pub duration: Duration,
    /// One entry per step that was executed or skipped, in execution order
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(job_name: &str, identity: &str) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            identity: identity.to_string(),
            status: BatchStatus::Starting,
            start: now,
            end: now,
            duration: Duration::ZERO,
            step_executions: Vec::new(),
        }
    }

    pub fn get_step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|step_execution| step_execution.name == step_name)
    }

    fn finish(&mut self, status: BatchStatus) {
        self.status = status;
        self.end = Instant::now();
        self.duration = self.end.duration_since(self.start);
    }
}

/// Represents an instance of a job.
///
/// A `JobInstance` is created through the `JobBuilder` and executed by calling
/// `run`. The steps are executed in the order they were added.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    /// Rejects any second run with the same parameters
    prevent_restart: bool,
    repository: Option<&'a dyn JobRepository>,
    default_repository: InMemoryJobRepository,
}

impl JobInstance<'_> {
    fn repository(&self) -> &dyn JobRepository {
        self.repository.unwrap_or(&self.default_repository)
    }

    /// Returns the last recorded execution for the given parameters.
    pub fn get_last_execution(&self, parameters: &JobParameters) -> Option<JobExecution> {
        self.repository()
            .get_last_job_execution(&self.name, &parameters.identity())
    }

    pub fn is_restartable(&self) -> bool {
        !self.prevent_restart
    }

    fn check_restart(&self, previous: &JobExecution) -> Result<(), BatchError> {
        if self.prevent_restart {
            return Err(BatchError::Restart(format!(
                "job {} with parameters [{}] was already executed and is not restartable",
                self.name, previous.identity
            )));
        }

        match previous.status {
            BatchStatus::Completed => Err(BatchError::Restart(format!(
                "job {} with parameters [{}] is already complete",
                self.name, previous.identity
            ))),
            BatchStatus::Starting | BatchStatus::Started => Err(BatchError::Restart(format!(
                "job {} with parameters [{}] is already running",
                self.name, previous.identity
            ))),
            BatchStatus::Failed | BatchStatus::Stopped => {
                info!(
                    "Restarting job: {} after {:?} execution {}",
                    self.name, previous.status, previous.id
                );
                Ok(())
            }
        }
    }
}

impl Job for JobInstance<'_> {
    fn get_name(&self) -> &str {
        &self.name
    }

    /// Runs the job by executing its steps in sequence.
    ///
    /// On a restart, steps that completed in the previous execution are skipped and
    /// the others resume from the execution context they saved.
    fn run(&self, parameters: &JobParameters) -> JobResult<JobExecution> {
        let identity = parameters.identity();
        let repository = self.repository();

        let previous = repository.get_last_job_execution(&self.name, &identity);
        if let Some(previous) = &previous {
            self.check_restart(previous)?;
        }

        let mut job_execution = JobExecution::new(&self.name, &identity);
        job_execution.status = BatchStatus::Started;
        repository.save_job_execution(&job_execution)?;

        info!(
            "Start of job: {}, id: {}, execution: {}",
            self.name, self.id, job_execution.id
        );

        for step in &self.steps {
            let previous_step = previous
                .as_ref()
                .and_then(|previous| previous.get_step_execution(step.get_name()));

            let mut step_execution = match previous_step {
                Some(previous_step) if previous_step.status == StepStatus::Completed => {
                    info!("Step {} already completed, skipping it", step.get_name());
                    job_execution.step_executions.push(previous_step.clone());
                    continue;
                }
                Some(previous_step) => StepExecution::with_context(
                    step.get_name(),
                    previous_step.execution_context.clone(),
                ),
                None => StepExecution::new(step.get_name()),
            };

            let result = step.execute(&mut step_execution);
            let step_status = step_execution.status;
            job_execution.step_executions.push(step_execution);

            if let Err(error) = result {
                job_execution.finish(BatchStatus::Failed);
                repository.save_job_execution(&job_execution)?;
                error!("Job {} failed: {}", self.name, error);
                return Err(error);
            }

            if step_status == StepStatus::Stopped {
                job_execution.finish(BatchStatus::Stopped);
                repository.save_job_execution(&job_execution)?;
                info!("Job {} stopped at step {}", self.name, step.get_name());
                return Ok(job_execution);
            }
        }

        job_execution.finish(BatchStatus::Completed);
        repository.save_job_execution(&job_execution)?;

        info!("End of job: {}, id: {}", self.name, self.id);

        Ok(job_execution)
    }
}

/// Builder for creating a job instance.
///
/// # Example
///
/// ```ignore
/// use chunk_batch::core::job::JobBuilder;
///
/// let job = JobBuilder::new()
///     .name("jdbcPagingItemReaderJob".to_string())
///     .start(&read_step)
///     .next(&report_step)
///     .prevent_restart()
///     .build();
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
    prevent_restart: bool,
    repository: Option<&'a dyn JobRepository>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            prevent_restart: false,
            repository: None,
        }
    }

    pub fn name(mut self, name: String) -> JobBuilder<'a> {
        self.name = Some(name);
        self
    }

    /// Sets the first step of the job.
    ///
    /// This method is semantically identical to `next()` but provides better readability
    /// when constructing the initial step of a job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job. Steps are executed in the order they are added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Makes every job instance runnable only once.
    pub fn prevent_restart(mut self) -> JobBuilder<'a> {
        self.prevent_restart = true;
        self
    }

    /// Shares a repository between jobs; by default each job keeps its own.
    pub fn repository(mut self, repository: &'a dyn JobRepository) -> JobBuilder<'a> {
        self.repository = Some(repository);
        self
    }

    pub fn build(self) -> JobInstance<'a> {
        JobInstance {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            prevent_restart: self.prevent_restart,
            repository: self.repository,
            default_repository: InMemoryJobRepository::new(),
        }
    }
}
