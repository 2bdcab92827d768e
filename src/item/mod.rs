#[cfg(feature = "logger")]
/// This module provides a logger item writer.
pub mod logger;

#[cfg(feature = "rdbc")]
/// This module provides cursor and paging database readers and a transactional database writer.
pub mod rdbc;
