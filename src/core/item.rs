use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::BatchError;

/// Result of a single read: `Ok(None)` marks the end of the stream.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` means the item is filtered out.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

pub type ItemWriterResult = Result<(), BatchError>;

/// Key/value store attached to a step execution.
///
/// Readers write their position into it after every committed chunk so that a
/// failed step can be resumed from its last checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<V: Serialize>(&mut self, key: &str, value: V) -> Result<(), BatchError> {
        let value = serde_json::to_value(value).map_err(|error| {
            BatchError::Configuration(format!("cannot store context key {}: {}", key, error))
        })?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn put_usize(&mut self, key: &str, value: usize) {
        self.entries.insert(key.to_string(), Value::from(value));
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, BatchError> {
        match self.entries.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|error| {
                    BatchError::Configuration(format!(
                        "cannot restore context key {}: {}",
                        key, error
                    ))
                }),
            None => Ok(None),
        }
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strategy producing the items of a step, one at a time.
pub trait ItemReader<I> {
    /// Reads the next item, `Ok(None)` once the source is exhausted.
    fn read(&self) -> ItemReaderResult<I>;

    /// Acquires resources and restores the position saved in `context`, if any.
    fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Saves the current position into `context`. Called before each commit.
    fn update(&self, _context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Releases resources. Called when the step ends, whatever its outcome.
    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

pub trait ItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Strategy receiving the surviving items of a chunk.
///
/// Writers run inside the chunk transaction and must not commit on their own.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Processor used when a step is built without one.
///
/// Converts each item with `Into`, which is the identity when both types are equal.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<I: Clone + Into<O>, O> ItemProcessor<I, O> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        Ok(Some(item.clone().into()))
    }
}
