//! Mock version of a pay writer;
use std::sync::{Arc, Mutex};

use chunk_batch::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
    jobs::Pay,
};
use mockall::mock;

mock! {
    pub PayWriter {}
    impl ItemWriter<Pay> for PayWriter {
        fn write(&self, items: &[Pay]) -> ItemWriterResult;
    }
}

/// Writer recording the ids of every chunk it accepts.
pub fn recording_writer() -> (MockPayWriter, Arc<Mutex<Vec<Vec<i64>>>>) {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&chunks);

    let mut writer = MockPayWriter::new();
    writer.expect_write().returning(move |items| {
        recorded
            .lock()
            .unwrap()
            .push(items.iter().map(|pay| pay.id).collect());
        Ok(())
    });
    (writer, chunks)
}

/// Writer accepting chunks until its `failing_call`-th write, which fails.
pub fn failing_writer(failing_call: usize) -> (MockPayWriter, Arc<Mutex<Vec<Vec<i64>>>>) {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&chunks);
    let mut calls = 0;

    let mut writer = MockPayWriter::new();
    writer.expect_write().returning(move |items| {
        calls += 1;
        if calls == failing_call {
            return Err(BatchError::ItemWriter(format!("write {} refused", calls)));
        }
        recorded
            .lock()
            .unwrap()
            .push(items.iter().map(|pay| pay.id).collect());
        Ok(())
    });
    (writer, chunks)
}

pub fn flatten(chunks: &Arc<Mutex<Vec<Vec<i64>>>>) -> Vec<i64> {
    chunks.lock().unwrap().iter().flatten().copied().collect()
}
