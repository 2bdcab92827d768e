use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Tunables of the pay jobs, read from a JSON file. Missing fields keep their default.
///
/// ```json
/// { "processor_null_chunk_size": 500, "min_amount": 3000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Chunk size of `processorNullBatch`, also its page size
    pub processor_null_chunk_size: usize,
    pub cursor_chunk_size: usize,
    pub cursor_fetch_size: usize,
    pub paging_chunk_size: usize,
    pub paging_page_size: usize,
    /// Default for the `amount` parameter of `jdbcPagingItemReaderJob`
    pub min_amount: i64,
    pub max_connections: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            processor_null_chunk_size: 1000,
            cursor_chunk_size: 10,
            cursor_fetch_size: 10,
            paging_chunk_size: 10,
            paging_page_size: 10,
            min_amount: 2000,
            max_connections: 5,
        }
    }
}

impl BatchSettings {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|error| {
            BatchError::Configuration(format!("cannot read {}: {}", path.display(), error))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, BatchError> {
        serde_json::from_str(content)
            .map_err(|error| BatchError::Configuration(format!("invalid settings: {}", error)))
    }

    /// Overrides the chunk size of one job.
    pub fn set_chunk_size(&mut self, job_name: &str, chunk_size: usize) -> Result<(), BatchError> {
        match job_name {
            super::PROCESSOR_NULL_JOB => self.processor_null_chunk_size = chunk_size,
            super::JDBC_CURSOR_JOB => self.cursor_chunk_size = chunk_size,
            super::JDBC_PAGING_JOB => self.paging_chunk_size = chunk_size,
            _ => {
                return Err(BatchError::Configuration(format!(
                    "unknown job {}",
                    job_name
                )));
            }
        }
        Ok(())
    }
}
