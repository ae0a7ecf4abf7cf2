//! Per-file executor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use kvsql_result::Result;
use rustc_hash::FxHashMap;

use super::batch_executor::{BatchExecutor, BatchExecutorInner};
use super::block_executor::BatchBlockExecutor;
use super::reader::ColumnarFileReader;
use super::state::BatchExecutionState;

/// Drives up to `max_concurrent_blocks_per_file` block executors over one
/// columnar file.
///
/// `remaining_blocks` — not child-map membership — is the authoritative
/// "is this file done?" signal: it starts at the file's block count and
/// drops once per released block.
pub(crate) struct BatchFileExecutor {
    path: PathBuf,
    reader: Arc<dyn ColumnarFileReader>,
    block_count: usize,
    next_block: AtomicUsize,
    remaining_blocks: AtomicUsize,
    children: Mutex<FxHashMap<usize, Arc<BatchBlockExecutor>>>,
    root: Weak<BatchExecutorInner>,
    state: Arc<BatchExecutionState>,
}

impl BatchFileExecutor {
    /// Opens the file eagerly; an open failure fails the whole batch.
    pub(crate) fn new(root: Weak<BatchExecutorInner>, path: PathBuf) -> Result<Arc<Self>> {
        let (reader, state) = {
            let inner = root.upgrade().expect("batch executor gone during setup");
            (inner.factory.open(&path)?, Arc::clone(&inner.state))
        };
        let block_count = reader.block_count();
        Ok(Arc::new(Self {
            path,
            reader,
            block_count,
            next_block: AtomicUsize::new(0),
            remaining_blocks: AtomicUsize::new(block_count),
            children: Mutex::new(FxHashMap::default()),
            root,
            state,
        }))
    }

    pub(crate) fn path(&self) -> &PathBuf {
        &self.path
    }

    pub(crate) fn reader(&self) -> &Arc<dyn ColumnarFileReader> {
        &self.reader
    }

    fn root(&self) -> Option<BatchExecutor> {
        self.root.upgrade().map(|inner| BatchExecutor { inner })
    }

    /// Start up to the per-file block cap. A file with no blocks (or whose
    /// blocks are all empty) completes immediately.
    pub(crate) fn bootstrap(self: &Arc<Self>) {
        let cap = self
            .root()
            .map(|root| root.inner.options.max_concurrent_blocks_per_file.max(1))
            .unwrap_or(1);
        for _ in 0..cap {
            if self.next_block().is_none() {
                break;
            }
        }
        if self.remaining_blocks.load(Ordering::SeqCst) == 0 {
            if let Some(root) = self.root() {
                root.end_of_file(self);
            }
        }
    }

    /// Create the next block executor and kick off its first statement.
    /// Empty row groups are released and skipped; `None` means the file has
    /// no further blocks to start (or the batch is aborting).
    pub(crate) fn next_block(self: &Arc<Self>) -> Option<Arc<BatchBlockExecutor>> {
        loop {
            if self.state.error_aborting() {
                return None;
            }
            let index = self.next_block.fetch_add(1, Ordering::SeqCst);
            if index >= self.block_count {
                return None;
            }
            let block = BatchBlockExecutor::new(
                Arc::downgrade(self),
                self.root.clone(),
                index,
                Arc::clone(&self.state),
            );
            self.children
                .lock()
                .expect("file children lock poisoned")
                .insert(Arc::as_ptr(&block) as usize, Arc::clone(&block));

            match block.next_statement() {
                (true, true) => return Some(block),
                (true, false) => {
                    // Empty row group: release and try the next one.
                    self.release(&block);
                    continue;
                }
                (false, _) => {
                    // Failure already recorded in the shared state.
                    self.release(&block);
                    return None;
                }
            }
        }
    }

    /// Remove the block from the child map and drop the remaining count.
    /// The two are deliberately separate: the counter, not map membership,
    /// decides when the file is done.
    pub(crate) fn release(&self, block: &Arc<BatchBlockExecutor>) {
        self.children
            .lock()
            .expect("file children lock poisoned")
            .remove(&(Arc::as_ptr(block) as usize));
        self.remaining_blocks.fetch_sub(1, Ordering::SeqCst);
    }

    /// A block ran out of statements: release it, keep the pipeline full,
    /// and notify the root once the last block of this file is gone.
    pub(crate) fn end_of_block(self: &Arc<Self>, block: &Arc<BatchBlockExecutor>) {
        self.release(block);
        if self.next_block().is_some() {
            return;
        }
        if self.remaining_blocks.load(Ordering::SeqCst) == 0 {
            if let Some(root) = self.root() {
                root.end_of_file(self);
            }
        }
    }
}
