#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// The chunk reached its configured size, more items may follow.
    Full,
    /// The reader is exhausted; this is the last chunk of the step.
    Finished,
}

/// Phase of the chunk loop a step is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Idle,
    Reading,
    Processing,
    Writing,
    Committing,
}

/// Items read for one commit interval.
#[derive(Debug)]
pub struct Chunk<I> {
    items: Vec<I>,
    status: ChunkStatus,
    chunk_size: usize,
}

impl<I> Chunk<I> {
    pub fn new(chunk_size: usize) -> Chunk<I> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            status: ChunkStatus::Full,
            chunk_size,
        }
    }

    /// Adds an item and returns `true` once the chunk is full.
    pub fn add_item(&mut self, item: I) -> bool {
        self.items.push(item);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.chunk_size
    }

    /// Marks the chunk as the last one of the stream.
    pub fn finish(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    pub fn get_items(&self) -> &[I] {
        &self.items
    }

    pub fn get_status(&self) -> ChunkStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
