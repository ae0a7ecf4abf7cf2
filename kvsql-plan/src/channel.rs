//! Result output channels.

use std::sync::Mutex;

use arrow::record_batch::RecordBatch;
use kvsql_result::Result;

/// What sits behind a channel. Statement-shape validation treats the null
/// sink and the test result store as shape-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// A real record channel with an external consumer.
    Record,
    /// Discards everything.
    NullSink,
    /// Collects batches in memory; used by tests and internal readers.
    ResultStore,
}

/// Sink for result-set record batches produced by query plan bodies.
pub trait RecordChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;
    fn write(&self, batch: RecordBatch) -> Result<()>;
}

/// Channel that discards all output.
#[derive(Debug, Default)]
pub struct NullChannel;

impl RecordChannel for NullChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::NullSink
    }

    fn write(&self, _batch: RecordBatch) -> Result<()> {
        Ok(())
    }
}

/// Channel that retains every batch in memory.
#[derive(Debug, Default)]
pub struct ResultStore {
    batches: Mutex<Vec<RecordBatch>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the collected batches.
    pub fn take_batches(&self) -> Vec<RecordBatch> {
        std::mem::take(&mut *self.batches.lock().expect("result store lock poisoned"))
    }

    /// Copy of the collected batches.
    pub fn batches(&self) -> Vec<RecordBatch> {
        self.batches
            .lock()
            .expect("result store lock poisoned")
            .clone()
    }

    pub fn row_count(&self) -> usize {
        self.batches
            .lock()
            .expect("result store lock poisoned")
            .iter()
            .map(|b| b.num_rows())
            .sum()
    }
}

impl RecordChannel for ResultStore {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ResultStore
    }

    fn write(&self, batch: RecordBatch) -> Result<()> {
        self.batches
            .lock()
            .expect("result store lock poisoned")
            .push(batch);
        Ok(())
    }
}
