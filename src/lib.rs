#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Chunk Batch

 A chunk-oriented batch engine: a step reads items one at a time, optionally transforms or
 filters them, and hands them to a writer in fixed-size chunks. Every chunk is processed and
 written inside one transaction and committed before the next one is read, so a failure
 only loses the chunk in flight.

 ## Core Concepts

- **Job:** an ordered sequence of steps, identified by its name and its `JobParameters`.
  A job can forbid restarts; a restartable job resumes a failed run from the last
  committed chunk.
- **Step:** a `ChunkOrientedStep` wiring a reader, an optional processor and a writer
  together with a chunk size and a `TransactionManager`.
- **ItemReader:** produces the input of a step one item at a time and records its
  position into an `ExecutionContext` at every commit.
- **ItemProcessor:** transforms an item, or filters it out by returning `Ok(None)`.
- **ItemWriter:** receives the surviving items of a chunk.

 ## Features

| **Feature**   | **Description**                                                       |
|---------------|-----------------------------------------------------------------------|
| logger        | Enables the logging `ItemWriter`                                      |
| rdbc          | Enables the cursor and paging readers and the database writer (`sqlx` Any driver) |
| rdbc-sqlite   | Enables the SQLite driver                                             |
| rdbc-postgres | Enables the PostgreSQL driver                                         |
| jobs          | Enables the `pay` table jobs                                          |
| cli           | Builds the `pay-batch` binary                                         |
| full          | Enables all available features                                        |

 ## Getting Started

```rust
# use chunk_batch::{
#     core::{
#         item::{ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
#         job::{BatchStatus, Job, JobBuilder, JobParameters},
#         step::StepBuilder,
#     },
#     BatchError,
# };
# use std::cell::{Cell, RefCell};
struct Counter {
    next: Cell<u32>,
    last: u32,
}

impl ItemReader<u32> for Counter {
    fn read(&self) -> ItemReaderResult<u32> {
        let value = self.next.get();
        if value > self.last {
            return Ok(None);
        }
        self.next.set(value + 1);
        Ok(Some(value))
    }
}

struct OddOnly;

impl ItemProcessor<u32, u32> for OddOnly {
    fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
        Ok((item % 2 == 1).then_some(*item))
    }
}

#[derive(Default)]
struct Collector(RefCell<Vec<u32>>);

impl ItemWriter<u32> for Collector {
    fn write(&self, items: &[u32]) -> ItemWriterResult {
        self.0.borrow_mut().extend_from_slice(items);
        Ok(())
    }
}

fn main() -> Result<(), BatchError> {
    let reader = Counter { next: Cell::new(1), last: 10 };
    let processor = OddOnly;
    let writer = Collector::default();

    let step = StepBuilder::new("odd-numbers")
        .chunk::<u32, u32>(3)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build()?;

    let job = JobBuilder::new().start(&step).build();
    let execution = job.run(&JobParameters::new())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(*writer.0.borrow(), vec![1, 3, 5, 7, 9]);
    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers / writers (logger, database)
pub mod item;

/// Jobs over the `pay` table
#[cfg(feature = "jobs")]
pub mod jobs;
