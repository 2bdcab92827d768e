use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use crate::BatchError;

use super::job::JobExecution;

/// Store of job executions, keyed by job name and identifying parameters.
///
/// The job consults it before a run to decide whether the instance may be
/// (re)started, and saves the execution when it starts and when it ends.
pub trait JobRepository {
    fn get_last_job_execution(&self, job_name: &str, identity: &str) -> Option<JobExecution>;

    /// Inserts the execution, or replaces a previously saved one with the same id.
    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError>;
}

/// Job repository living in process memory; nothing survives the process.
#[derive(Default)]
pub struct InMemoryJobRepository {
    executions: Mutex<HashMap<(String, String), Vec<JobExecution>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All executions of one job instance, oldest first.
    pub fn get_job_executions(&self, job_name: &str, identity: &str) -> Vec<JobExecution> {
        let executions = self
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        executions
            .get(&(job_name.to_string(), identity.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn get_last_job_execution(&self, job_name: &str, identity: &str) -> Option<JobExecution> {
        self.get_job_executions(job_name, identity).pop()
    }

    fn save_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let mut executions = self
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let instance = executions
            .entry((
                job_execution.job_name.clone(),
                job_execution.identity.clone(),
            ))
            .or_default();

        match instance
            .iter_mut()
            .find(|execution| execution.id == job_execution.id)
        {
            Some(saved) => *saved = job_execution.clone(),
            None => instance.push(job_execution.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{BatchStatus, JobExecution};

    #[test]
    fn saving_twice_updates_the_same_execution() {
        let repository = InMemoryJobRepository::new();
        let mut execution = JobExecution::new("job", "amount=2000");
        repository.save_job_execution(&execution).unwrap();

        execution.status = BatchStatus::Completed;
        repository.save_job_execution(&execution).unwrap();

        let executions = repository.get_job_executions("job", "amount=2000");
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, BatchStatus::Completed);
    }

    #[test]
    fn last_execution_is_scoped_by_identity() {
        let repository = InMemoryJobRepository::new();
        let first = JobExecution::new("job", "run=1");
        let second = JobExecution::new("job", "run=1");
        repository.save_job_execution(&first).unwrap();
        repository.save_job_execution(&second).unwrap();

        let last = repository.get_last_job_execution("job", "run=1").unwrap();
        assert_eq!(last.id, second.id);
        assert!(repository.get_last_job_execution("job", "run=2").is_none());
        assert!(repository.get_last_job_execution("other", "run=1").is_none());
    }
}
