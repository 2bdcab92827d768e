use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    chunk::{Chunk, ChunkState, ChunkStatus},
    item::{ExecutionContext, ItemProcessor, ItemReader, ItemWriter, PassThroughProcessor},
    transaction::{ResourcelessTransactionManager, TransactionManager},
};

static PASS_THROUGH: PassThroughProcessor = PassThroughProcessor;

static RESOURCELESS: ResourcelessTransactionManager = ResourcelessTransactionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Starting,
    Started,
    Completed,
    Failed,
    /// The step honoured a stop request between two chunks.
    Stopped,
}

/// Execution state of one run of a step.
///
/// Counters only account for committed chunks, except `read_count` and
/// `read_skip_count` which follow the reader, and `rollback_count`.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub id: Uuid,
    pub name: String,
    pub status: StepStatus,
    /// Phase of the chunk loop, left where it was when the step failed.
    pub chunk_state: ChunkState,
    pub start_time: Instant,
    pub end_time: Instant,
    pub duration: Duration,
    pub read_count: usize,
    pub filter_count: usize,
    pub write_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    /// Number of items consumed from the reader when the last chunk was committed.
    pub committed_read_count: usize,
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StepStatus::Starting,
            chunk_state: ChunkState::Idle,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            read_count: 0,
            filter_count: 0,
            write_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            committed_read_count: 0,
            execution_context: ExecutionContext::new(),
        }
    }

    /// Creates an execution that resumes from a previously saved context.
    pub fn with_context(name: &str, execution_context: ExecutionContext) -> Self {
        Self {
            execution_context,
            ..Self::new(name)
        }
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count
    }
}

/// A unit of work of a job.
pub trait Step {
    fn get_name(&self) -> &str;

    /// Executes the step, recording its progress into `step_execution`.
    ///
    /// # Returns
    /// - `Ok(())`: the step completed or stopped on request
    /// - `Err(BatchError::Step)`: the step failed
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Decides whether a failed read or process call may be skipped.
///
/// This is the hook for fault tolerance; write failures are never skipped because a
/// chunk is written all-or-nothing.
pub trait SkipPolicy {
    fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool;
}

/// Skips item errors until `skip_limit` of them have been skipped in the step.
pub struct LimitCheckingSkipPolicy {
    skip_limit: usize,
}

impl LimitCheckingSkipPolicy {
    pub fn new(skip_limit: usize) -> Self {
        Self { skip_limit }
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &BatchError, skip_count: usize) -> bool {
        let skippable = matches!(
            error,
            BatchError::DataAccess(_) | BatchError::ItemProcessor(_)
        );
        skippable && skip_count < self.skip_limit
    }
}

/// Requests a running step to stop once its current chunk is committed.
#[derive(Clone, Default)]
pub struct StopHandle {
    stop_requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}

struct ProcessedChunk<O> {
    items: Vec<O>,
    filtered: usize,
    skipped: usize,
}

/// Step reading, processing and writing items in fixed-size chunks.
///
/// Every chunk is processed and written inside one transaction of the configured
/// `TransactionManager`, then committed before the next chunk is read.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    reader: &'a dyn ItemReader<I>,
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    transaction_manager: &'a dyn TransactionManager,
    chunk_size: usize,
    skip_policy: Option<&'a dyn SkipPolicy>,
    default_skip_policy: LimitCheckingSkipPolicy,
    stop_handle: StopHandle,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let start_time = Instant::now();
        step_execution.start_time = start_time;
        step_execution.status = StepStatus::Started;

        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        let result = self
            .open(step_execution)
            .and_then(|()| self.run_chunks(step_execution));

        // Reader and writer are released whatever the outcome
        let close_result = self.close();

        step_execution.end_time = Instant::now();
        step_execution.duration = step_execution.end_time.duration_since(start_time);

        let outcome = match (result, close_result) {
            (Ok(status), Ok(())) => Ok(status),
            (Err(error), _) | (Ok(_), Err(error)) => Err(error),
        };

        match outcome {
            Ok(status) => {
                step_execution.status = status;
                step_execution.chunk_state = ChunkState::Idle;
                info!(
                    "End of step: {}, id: {}, status: {:?}, read: {}, filtered: {}, written: {}, commits: {}",
                    step_execution.name,
                    step_execution.id,
                    status,
                    step_execution.read_count,
                    step_execution.filter_count,
                    step_execution.write_count,
                    step_execution.commit_count
                );
                Ok(())
            }
            Err(error) => {
                step_execution.status = StepStatus::Failed;
                error!(
                    "Step {} failed in state {:?}: {}",
                    self.name, step_execution.chunk_state, error
                );
                Err(BatchError::Step {
                    step: self.name.clone(),
                    committed_chunks: step_execution.commit_count,
                    read_position: step_execution.committed_read_count,
                    source: Box::new(error),
                })
            }
        }
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    /// Returns a handle that can stop this step between two chunks.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn skip_policy(&self) -> &dyn SkipPolicy {
        self.skip_policy.unwrap_or(&self.default_skip_policy)
    }

    fn open(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.reader.open(&step_execution.execution_context)?;
        self.writer.open()
    }

    fn close(&self) -> Result<(), BatchError> {
        let reader_result = self.reader.close();
        if let Err(error) = &reader_result {
            warn!("Error closing reader of step {}: {}", self.name, error);
        }
        let writer_result = self.writer.close();
        if let Err(error) = &writer_result {
            warn!("Error closing writer of step {}: {}", self.name, error);
        }
        reader_result.and(writer_result)
    }

    fn run_chunks(&self, step_execution: &mut StepExecution) -> Result<StepStatus, BatchError> {
        loop {
            if self.stop_handle.is_stop_requested() {
                self.stop_handle.reset();
                info!(
                    "Stop requested, step {} stops after {} chunk(s)",
                    self.name, step_execution.commit_count
                );
                return Ok(StepStatus::Stopped);
            }

            step_execution.chunk_state = ChunkState::Reading;
            let chunk = self.read_chunk(step_execution)?;

            if chunk.is_empty() && chunk.get_status() == ChunkStatus::Finished {
                debug!("No more items to read");
                return Ok(StepStatus::Completed);
            }

            self.transaction_manager.begin()?;

            if let Err(error) = self.process_and_write_chunk(step_execution, &chunk) {
                self.rollback(step_execution);
                return Err(error);
            }

            if chunk.get_status() == ChunkStatus::Finished {
                return Ok(StepStatus::Completed);
            }
        }
    }

    /// Reads up to `chunk_size` items.
    ///
    /// # Returns
    /// - `Ok(chunk)` with status `Full` when `chunk_size` items were read
    /// - `Ok(chunk)` with status `Finished` when the reader is exhausted
    /// - `Err(BatchError)` when a read error may not be skipped
    fn read_chunk(&self, step_execution: &mut StepExecution) -> Result<Chunk<I>, BatchError> {
        debug!("Start reading chunk");

        let mut chunk = Chunk::new(self.chunk_size);

        while !chunk.is_full() {
            match self.reader.read() {
                Ok(Some(item)) => {
                    step_execution.read_count += 1;
                    chunk.add_item(item);
                }
                Ok(None) => {
                    chunk.finish();
                    break;
                }
                Err(error) => {
                    if self
                        .skip_policy()
                        .should_skip(&error, step_execution.skip_count())
                    {
                        warn!("Skipping item after read error: {}", error);
                        step_execution.read_skip_count += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        debug!(
            "End reading chunk: {} items, {:?}",
            chunk.len(),
            chunk.get_status()
        );
        Ok(chunk)
    }

    fn process_and_write_chunk(
        &self,
        step_execution: &mut StepExecution,
        chunk: &Chunk<I>,
    ) -> Result<(), BatchError> {
        step_execution.chunk_state = ChunkState::Processing;
        let processed = self.process_chunk(step_execution, chunk.get_items())?;

        step_execution.chunk_state = ChunkState::Writing;
        self.write_chunk(&processed.items)?;

        step_execution.chunk_state = ChunkState::Committing;
        let mut checkpoint = step_execution.execution_context.clone();
        self.reader.update(&mut checkpoint)?;
        self.transaction_manager.commit()?;

        step_execution.execution_context = checkpoint;
        step_execution.filter_count += processed.filtered;
        step_execution.process_skip_count += processed.skipped;
        step_execution.write_count += processed.items.len();
        step_execution.commit_count += 1;
        step_execution.committed_read_count =
            step_execution.read_count + step_execution.read_skip_count;
        step_execution.chunk_state = ChunkState::Idle;

        debug!(
            "Chunk {} committed: {} written, {} filtered",
            step_execution.commit_count,
            processed.items.len(),
            processed.filtered
        );
        Ok(())
    }

    fn process_chunk(
        &self,
        step_execution: &StepExecution,
        read_items: &[I],
    ) -> Result<ProcessedChunk<O>, BatchError> {
        debug!("Processing chunk of {} items", read_items.len());

        let mut processed = ProcessedChunk {
            items: Vec::with_capacity(read_items.len()),
            filtered: 0,
            skipped: 0,
        };

        for item in read_items {
            match self.processor.process(item) {
                Ok(Some(output)) => processed.items.push(output),
                Ok(None) => processed.filtered += 1,
                Err(error) => {
                    let skip_count = step_execution.skip_count() + processed.skipped;
                    if self.skip_policy().should_skip(&error, skip_count) {
                        warn!("Skipping item after processing error: {}", error);
                        processed.skipped += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Ok(processed)
    }

    fn write_chunk(&self, processed_items: &[O]) -> Result<(), BatchError> {
        if processed_items.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(());
        }

        debug!("Writing chunk of {} items", processed_items.len());
        self.writer.write(processed_items)?;
        self.writer.flush()
    }

    fn rollback(&self, step_execution: &mut StepExecution) {
        step_execution.rollback_count += 1;
        if let Err(error) = self.transaction_manager.rollback() {
            error!("Rollback failed in step {}: {}", self.name, error);
        }
    }
}

/// Entry point for building steps.
///
/// ```
/// # use chunk_batch::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};
/// # use chunk_batch::core::step::{Step, StepBuilder, StepExecution};
/// # struct Numbers;
/// # impl ItemReader<u32> for Numbers {
/// #     fn read(&self) -> ItemReaderResult<u32> { Ok(None) }
/// # }
/// # struct Sink;
/// # impl ItemWriter<u32> for Sink {
/// #     fn write(&self, _items: &[u32]) -> ItemWriterResult { Ok(()) }
/// # }
/// let (reader, writer) = (Numbers, Sink);
/// let step = StepBuilder::new("numbers")
///     .chunk::<u32, u32>(10)
///     .reader(&reader)
///     .writer(&writer)
///     .build()
///     .unwrap();
///
/// let mut execution = StepExecution::new(step.get_name());
/// assert!(step.execute(&mut execution).is_ok());
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Builds a step with a random name.
    pub fn unnamed() -> Self {
        Self::new(&build_name())
    }

    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    transaction_manager: Option<&'a dyn TransactionManager>,
    chunk_size: usize,
    skip_limit: usize,
    skip_policy: Option<&'a dyn SkipPolicy>,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            transaction_manager: None,
            chunk_size: 10,
            skip_limit: 0,
            skip_policy: None,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Sets the commit interval. Must be at least 1.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn transaction_manager(mut self, transaction_manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = Some(transaction_manager);
        self
    }

    /// Number of read or process errors tolerated before the step fails.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Replaces the skip limit with a custom policy.
    pub fn skip_policy(mut self, skip_policy: &'a dyn SkipPolicy) -> Self {
        self.skip_policy = Some(skip_policy);
        self
    }

    /// Validates the configuration and builds the step.
    ///
    /// Without a processor, items are converted with `Into`, which is the identity
    /// when input and output types are the same.
    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError>
    where
        PassThroughProcessor: ItemProcessor<I, O>,
    {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step {} must be at least 1",
                self.name
            )));
        }

        let reader = self.reader.ok_or_else(|| {
            BatchError::Configuration(format!("a reader is required for step {}", self.name))
        })?;
        let writer = self.writer.ok_or_else(|| {
            BatchError::Configuration(format!("a writer is required for step {}", self.name))
        })?;
        let default_processor: &'a dyn ItemProcessor<I, O> = &PASS_THROUGH;
        let default_transaction_manager: &'a dyn TransactionManager = &RESOURCELESS;

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor: self.processor.unwrap_or(default_processor),
            writer,
            transaction_manager: self
                .transaction_manager
                .unwrap_or(default_transaction_manager),
            chunk_size: self.chunk_size,
            skip_policy: self.skip_policy,
            default_skip_policy: LimitCheckingSkipPolicy::new(self.skip_limit),
            stop_handle: StopHandle::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
    };

    use super::*;
    use crate::core::item::{ItemProcessorResult, ItemReaderResult, ItemWriterResult};

    struct ListReader {
        items: RefCell<VecDeque<Result<i64, BatchError>>>,
        read: Cell<usize>,
        opened: Cell<bool>,
        closed: Cell<bool>,
    }

    impl ListReader {
        fn new(ids: impl IntoIterator<Item = i64>) -> Self {
            Self::with_results(ids.into_iter().map(Ok).collect())
        }

        fn with_results(results: Vec<Result<i64, BatchError>>) -> Self {
            Self {
                items: RefCell::new(results.into()),
                read: Cell::new(0),
                opened: Cell::new(false),
                closed: Cell::new(false),
            }
        }
    }

    impl ItemReader<i64> for ListReader {
        fn read(&self) -> ItemReaderResult<i64> {
            match self.items.borrow_mut().pop_front() {
                Some(Ok(item)) => {
                    self.read.set(self.read.get() + 1);
                    Ok(Some(item))
                }
                Some(Err(error)) => Err(error),
                None => Ok(None),
            }
        }

        fn open(&self, _context: &ExecutionContext) -> Result<(), BatchError> {
            self.opened.set(true);
            Ok(())
        }

        fn update(&self, context: &mut ExecutionContext) -> Result<(), BatchError> {
            context.put_usize("list.read.count", self.read.get());
            Ok(())
        }

        fn close(&self) -> Result<(), BatchError> {
            self.closed.set(true);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        chunks: RefCell<Vec<Vec<i64>>>,
        fail_on_call: Option<usize>,
        calls: Cell<usize>,
        stop_after_first_chunk: RefCell<Option<StopHandle>>,
    }

    impl RecordingWriter {
        fn failing_on_call(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Self::default()
            }
        }

        fn written(&self) -> Vec<i64> {
            self.chunks.borrow().iter().flatten().copied().collect()
        }
    }

    impl ItemWriter<i64> for RecordingWriter {
        fn write(&self, items: &[i64]) -> ItemWriterResult {
            self.calls.set(self.calls.get() + 1);
            if self.fail_on_call == Some(self.calls.get()) {
                return Err(BatchError::ItemWriter("disk full".to_string()));
            }
            self.chunks.borrow_mut().push(items.to_vec());
            if let Some(handle) = self.stop_after_first_chunk.borrow().as_ref() {
                handle.stop();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTransactionManager {
        begins: Cell<usize>,
        commits: Cell<usize>,
        rollbacks: Cell<usize>,
    }

    impl TransactionManager for RecordingTransactionManager {
        fn begin(&self) -> Result<(), BatchError> {
            self.begins.set(self.begins.get() + 1);
            Ok(())
        }

        fn commit(&self) -> Result<(), BatchError> {
            self.commits.set(self.commits.get() + 1);
            Ok(())
        }

        fn rollback(&self) -> Result<(), BatchError> {
            self.rollbacks.set(self.rollbacks.get() + 1);
            Ok(())
        }
    }

    struct OddIdsOnly;

    impl ItemProcessor<i64, i64> for OddIdsOnly {
        fn process(&self, item: &i64) -> ItemProcessorResult<i64> {
            if item % 2 == 0 { Ok(None) } else { Ok(Some(*item)) }
        }
    }

    struct RejectSeven;

    impl ItemProcessor<i64, i64> for RejectSeven {
        fn process(&self, item: &i64) -> ItemProcessorResult<i64> {
            if *item == 7 {
                Err(BatchError::ItemProcessor("7 is not allowed".to_string()))
            } else {
                Ok(Some(*item))
            }
        }
    }

    #[test]
    fn number_of_commits_is_items_divided_by_chunk_size_rounded_up() {
        for chunk_size in 1..=5 {
            for item_count in 0..=12_i64 {
                let reader = ListReader::new(1..=item_count);
                let writer = RecordingWriter::default();
                let transaction_manager = RecordingTransactionManager::default();

                let step = StepBuilder::new("count")
                    .chunk::<i64, i64>(chunk_size)
                    .reader(&reader)
                    .writer(&writer)
                    .transaction_manager(&transaction_manager)
                    .build()
                    .unwrap();

                let mut execution = StepExecution::new("count");
                step.execute(&mut execution).unwrap();

                let expected = (item_count as usize).div_ceil(chunk_size);
                assert_eq!(execution.commit_count, expected);
                assert_eq!(transaction_manager.commits.get(), expected);
                assert_eq!(execution.write_count, item_count as usize);
                assert_eq!(writer.written(), (1..=item_count).collect::<Vec<_>>());
                assert_eq!(
                    execution.duration,
                    execution.end_time.duration_since(execution.start_time)
                );
            }
        }
    }

    #[test]
    fn filtered_items_never_reach_the_writer() {
        let reader = ListReader::new(1..=10);
        let processor = OddIdsOnly;
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("filter")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("filter");
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.written(), vec![1, 3, 5, 7, 9]);
        // the last chunk only holds 10 and is committed without a write call
        assert_eq!(*writer.chunks.borrow(), vec![vec![1, 3], vec![5], vec![7, 9]]);
        assert_eq!(execution.commit_count, 4);
        assert_eq!(execution.read_count, 10);
        assert_eq!(execution.filter_count, 5);
        assert_eq!(execution.write_count, 5);
        assert_eq!(execution.status, StepStatus::Completed);
    }

    #[test]
    fn empty_source_completes_without_any_chunk() {
        let reader = ListReader::new(Vec::new());
        let writer = RecordingWriter::default();
        let transaction_manager = RecordingTransactionManager::default();

        let step = StepBuilder::new("empty")
            .chunk::<i64, i64>(5)
            .reader(&reader)
            .writer(&writer)
            .transaction_manager(&transaction_manager)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("empty");
        assert!(step.execute(&mut execution).is_ok());

        assert_eq!(execution.status, StepStatus::Completed);
        assert_eq!(execution.commit_count, 0);
        assert_eq!(execution.rollback_count, 0);
        assert_eq!(transaction_manager.begins.get(), 0);
        assert_eq!(writer.calls.get(), 0);
        assert!(reader.opened.get());
        assert!(reader.closed.get());
    }

    #[test]
    fn writer_failure_rolls_back_only_the_failing_chunk() {
        let reader = ListReader::new(1..=10);
        let writer = RecordingWriter::failing_on_call(3);
        let transaction_manager = RecordingTransactionManager::default();

        let step = StepBuilder::new("write-failure")
            .chunk::<i64, i64>(2)
            .reader(&reader)
            .writer(&writer)
            .transaction_manager(&transaction_manager)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("write-failure");
        let result = step.execute(&mut execution);

        match result {
            Err(BatchError::Step {
                step,
                committed_chunks,
                read_position,
                source,
            }) => {
                assert_eq!(step, "write-failure");
                assert_eq!(committed_chunks, 2);
                assert_eq!(read_position, 4);
                assert!(matches!(*source, BatchError::ItemWriter(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(execution.status, StepStatus::Failed);
        assert_eq!(execution.chunk_state, ChunkState::Writing);
        assert_eq!(transaction_manager.begins.get(), 3);
        assert_eq!(transaction_manager.commits.get(), 2);
        assert_eq!(transaction_manager.rollbacks.get(), 1);
        assert_eq!(execution.write_count, 4);
        assert_eq!(execution.rollback_count, 1);
        assert_eq!(writer.written(), vec![1, 2, 3, 4]);
        assert_eq!(
            execution.execution_context.get_usize("list.read.count"),
            Some(4)
        );
        assert!(reader.closed.get());
    }

    #[test]
    fn read_error_fails_the_step_without_skip_limit() {
        let reader = ListReader::with_results(vec![
            Ok(1),
            Err(BatchError::DataAccess("connection reset".to_string())),
            Ok(3),
        ]);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("read-failure")
            .chunk::<i64, i64>(5)
            .reader(&reader)
            .writer(&writer)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("read-failure");
        let error = step.execute(&mut execution).unwrap_err();

        assert!(matches!(error.root_cause(), BatchError::DataAccess(_)));
        assert_eq!(execution.status, StepStatus::Failed);
        assert_eq!(execution.commit_count, 0);
        assert_eq!(writer.calls.get(), 0);
    }

    #[test]
    fn read_error_is_skipped_within_the_skip_limit() {
        let reader = ListReader::with_results(vec![
            Ok(1),
            Err(BatchError::DataAccess("bad row".to_string())),
            Ok(3),
        ]);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("read-skip")
            .chunk::<i64, i64>(5)
            .reader(&reader)
            .writer(&writer)
            .skip_limit(1)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("read-skip");
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.written(), vec![1, 3]);
        assert_eq!(execution.read_skip_count, 1);
        assert_eq!(execution.committed_read_count, 3);
    }

    #[test]
    fn processor_error_rolls_back_the_chunk() {
        let reader = ListReader::new(1..=9);
        let processor = RejectSeven;
        let writer = RecordingWriter::default();
        let transaction_manager = RecordingTransactionManager::default();

        let step = StepBuilder::new("process-failure")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .transaction_manager(&transaction_manager)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("process-failure");
        let error = step.execute(&mut execution).unwrap_err();

        assert!(matches!(error.root_cause(), BatchError::ItemProcessor(_)));
        assert_eq!(execution.chunk_state, ChunkState::Processing);
        assert_eq!(writer.written(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(transaction_manager.rollbacks.get(), 1);
    }

    #[test]
    fn processor_error_is_skipped_with_a_custom_policy() {
        struct SkipEverything;
        impl SkipPolicy for SkipEverything {
            fn should_skip(&self, _error: &BatchError, _skip_count: usize) -> bool {
                true
            }
        }

        let reader = ListReader::new(5..=8);
        let processor = RejectSeven;
        let writer = RecordingWriter::default();
        let policy = SkipEverything;

        let step = StepBuilder::new("process-skip")
            .chunk::<i64, i64>(10)
            .reader(&reader)
            .processor(&processor)
            .writer(&writer)
            .skip_policy(&policy)
            .build()
            .unwrap();

        let mut execution = StepExecution::new("process-skip");
        step.execute(&mut execution).unwrap();

        assert_eq!(writer.written(), vec![5, 6, 8]);
        assert_eq!(execution.process_skip_count, 1);
    }

    #[test]
    fn stop_request_is_honoured_after_the_current_chunk() {
        let reader = ListReader::new(1..=10);
        let writer = RecordingWriter::default();

        let step = StepBuilder::new("stoppable")
            .chunk::<i64, i64>(3)
            .reader(&reader)
            .writer(&writer)
            .build()
            .unwrap();
        *writer.stop_after_first_chunk.borrow_mut() = Some(step.stop_handle());

        let mut execution = StepExecution::new("stoppable");
        step.execute(&mut execution).unwrap();

        assert_eq!(execution.status, StepStatus::Stopped);
        assert_eq!(execution.commit_count, 1);
        assert_eq!(writer.written(), vec![1, 2, 3]);
        assert!(!step.stop_handle().is_stop_requested());
    }

    #[test]
    fn build_rejects_a_zero_chunk_size() {
        let reader = ListReader::new(1..=3);
        let writer = RecordingWriter::default();

        let result = StepBuilder::new("zero")
            .chunk::<i64, i64>(0)
            .reader(&reader)
            .writer(&writer)
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn build_requires_reader_and_writer() {
        let writer = RecordingWriter::default();
        let result = StepBuilder::new("no-reader")
            .chunk::<i64, i64>(1)
            .writer(&writer)
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));

        let reader = ListReader::new(1..=3);
        let result = StepBuilder::new("no-writer")
            .chunk::<i64, i64>(1)
            .reader(&reader)
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn restored_context_is_handed_to_the_reader() {
        struct ContextProbe {
            restored: Cell<Option<usize>>,
        }
        impl ItemReader<i64> for ContextProbe {
            fn read(&self) -> ItemReaderResult<i64> {
                Ok(None)
            }
            fn open(&self, context: &ExecutionContext) -> Result<(), BatchError> {
                self.restored.set(context.get_usize("probe.read.count"));
                Ok(())
            }
        }

        let reader = ContextProbe {
            restored: Cell::new(None),
        };
        let writer = RecordingWriter::default();
        let step = StepBuilder::unnamed()
            .chunk::<i64, i64>(1)
            .reader(&reader)
            .writer(&writer)
            .build()
            .unwrap();

        let mut context = ExecutionContext::new();
        context.put_usize("probe.read.count", 12);
        let mut execution = StepExecution::with_context(step.get_name(), context);
        step.execute(&mut execution).unwrap();

        assert_eq!(reader.restored.get(), Some(12));
        assert_eq!(step.get_name().len(), 8);
    }
}
