use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemWriter, ItemWriterResult};

/// Writer logging one line per item at `info` level.
pub struct LoggerWriter {
    label: String,
}

impl LoggerWriter {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl Default for LoggerWriter {
    fn default() -> Self {
        Self::new("Record")
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemWriterResult {
        items
            .iter()
            .for_each(|item| info!("{}={:?}", self.label, item));
        Ok(())
    }
}
