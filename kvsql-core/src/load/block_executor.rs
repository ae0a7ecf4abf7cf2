//! Per-block executor: one row group, one internal OCC transaction, one
//! statement execution per row.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use kvsql_plan::ParameterValue;
use kvsql_result::{Error, ErrorInfo};
use rustc_hash::FxHashMap;

use crate::handles::TransactionHandle;
use crate::transaction::CommitOptions;

use super::batch_executor::{BatchExecutor, BatchExecutorInner};
use super::file_executor::BatchFileExecutor;
use super::reader::BlockRowReader;
use super::state::BatchExecutionState;

pub(crate) struct BatchBlockExecutor {
    file: Weak<BatchFileExecutor>,
    root: Weak<BatchExecutorInner>,
    /// 0-origin index of this block within its file.
    block_index: usize,
    /// Opened lazily on the first `next_statement`.
    reader: Mutex<Option<Box<dyn BlockRowReader>>>,
    /// Started lazily together with the reader.
    transaction: Mutex<Option<TransactionHandle>>,
    /// Parameter name → column position, resolved once per block.
    mapping: Mutex<FxHashMap<String, usize>>,
    statements_executed: AtomicUsize,
    state: Arc<BatchExecutionState>,
}

impl BatchBlockExecutor {
    pub(crate) fn new(
        file: Weak<BatchFileExecutor>,
        root: Weak<BatchExecutorInner>,
        block_index: usize,
        state: Arc<BatchExecutionState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            file,
            root,
            block_index,
            reader: Mutex::new(None),
            transaction: Mutex::new(None),
            mapping: Mutex::new(FxHashMap::default()),
            statements_executed: AtomicUsize::new(0),
            state,
        })
    }

    fn root(&self) -> Option<BatchExecutor> {
        self.root.upgrade().map(|inner| BatchExecutor { inner })
    }

    fn position_tag(&self, statement_position: usize) -> String {
        let path = self
            .file
            .upgrade()
            .map(|file| file.path().display().to_string())
            .unwrap_or_else(|| "<gone>".to_string());
        format!(
            "file:{path} block:{} statement:{statement_position}",
            self.block_index
        )
    }

    fn fail(&self, error: Error, supplement: String) {
        self.state
            .try_set_error(ErrorInfo::from(&error).with_supplement(supplement));
        if let Some(root) = self.root() {
            root.maybe_finish();
        }
    }

    /// Try to launch the next statement of this block.
    ///
    /// Returns `(success, found)`: `(true, true)` launched one, `(true,
    /// false)` the block is exhausted (its transaction commit has been
    /// submitted), `(false, _)` the batch is aborting or this block failed.
    pub(crate) fn next_statement(self: &Arc<Self>) -> (bool, bool) {
        if self.state.error_aborting() {
            return (false, false);
        }
        let Some(root) = self.root() else {
            return (false, false);
        };

        let mut parameters = (*root.inner.parameters).clone();

        // First call: open the reader and start this block's transaction.
        {
            let mut reader_slot = self.reader.lock().expect("block reader lock poisoned");
            let mut tx_slot = self.transaction.lock().expect("block transaction lock poisoned");
            if reader_slot.is_none() && tx_slot.is_none() {
                let file = match self.file.upgrade() {
                    Some(file) => file,
                    None => return (false, false),
                };
                let reader = match file.reader().open_block(self.block_index) {
                    Ok(reader) => reader,
                    Err(err) => {
                        drop(reader_slot);
                        drop(tx_slot);
                        self.fail(
                            Error::LoadFile(format!("opening block failed: {err}")),
                            self.position_tag(0),
                        );
                        return (false, false);
                    }
                };
                self.resolve_mapping(&root, reader.as_ref());

                // TODO: cap the transactions one batch may create once the
                // engine exposes a per-client quota.
                match root.inner.db.begin_load_transaction() {
                    Ok((handle, _ctx)) => {
                        *tx_slot = Some(handle);
                    }
                    Err(err) => {
                        drop(reader_slot);
                        drop(tx_slot);
                        self.fail(
                            Error::SqlExecution(format!(
                                "beginning load transaction failed: {err}"
                            )),
                            self.position_tag(0),
                        );
                        return (false, false);
                    }
                }
                *reader_slot = Some(reader);
            }
        }

        // Read one row.
        let row = {
            let mut reader_slot = self.reader.lock().expect("block reader lock poisoned");
            let Some(reader) = reader_slot.as_mut() else {
                return (false, false);
            };
            match reader.next_row() {
                Ok(row) => row,
                Err(err) => {
                    reader_slot.take();
                    drop(reader_slot);
                    self.fail(
                        Error::LoadFile(format!("reading row failed: {err}")),
                        self.position_tag(self.statements_executed.load(Ordering::SeqCst)),
                    );
                    return (false, false);
                }
            }
        };

        let Some(row) = row else {
            // End of block: close the reader and commit the transaction.
            self.reader.lock().expect("block reader lock poisoned").take();
            if self.state.error_aborting() {
                return (false, false);
            }
            self.commit_block_transaction(&root);
            return (true, false);
        };

        // Expand reference placeholders with this row's values.
        let mapping = self.mapping.lock().expect("block mapping lock poisoned").clone();
        let entries: Vec<(String, kvsql_plan::ParameterEntry)> = parameters
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        for (name, entry) in entries {
            let position = match &entry.value {
                ParameterValue::ReferenceColumnPosition(position) => *position,
                ParameterValue::ReferenceColumnName(_) => match mapping.get(&name) {
                    Some(position) => *position,
                    None => {
                        self.fail(
                            Error::LoadFile(format!(
                                "load parameter '{name}' names an unknown input column"
                            )),
                            self.position_tag(self.statements_executed.load(Ordering::SeqCst)),
                        );
                        return (false, false);
                    }
                },
                _ => continue,
            };
            match row.value_at(position) {
                Ok(Some(value)) => parameters.set_value(name, value),
                Ok(None) => parameters.set_null(name, entry.sql_type.clone()),
                Err(err) => {
                    self.fail(
                        err,
                        self.position_tag(self.statements_executed.load(Ordering::SeqCst)),
                    );
                    return (false, false);
                }
            }
        }

        if self.state.error_aborting() {
            return (false, false);
        }

        // Submit the statement execution.
        let position = self.statements_executed.fetch_add(1, Ordering::SeqCst);
        let transaction = match *self
            .transaction
            .lock()
            .expect("block transaction lock poisoned")
        {
            Some(handle) => handle,
            None => return (false, false),
        };

        let executable = match root
            .inner
            .db
            .resolve(&root.inner.statement, Arc::new(parameters))
        {
            Ok(executable) => executable,
            Err(err) => {
                self.fail(err, self.position_tag(position));
                return (false, false);
            }
        };

        self.state.statement_started();
        let callback_block = Arc::clone(self);
        let submit = root.inner.db.execute_async(
            Some(&transaction),
            &executable,
            None,
            Box::new(move |status, _stats| {
                callback_block.end_of_statement_callback(position, status);
            }),
            false,
        );
        if let Err(err) = submit {
            self.state.statement_finished();
            self.fail(err, self.position_tag(position));
            return (false, false);
        }
        (true, true)
    }

    fn resolve_mapping(&self, root: &BatchExecutor, reader: &dyn BlockRowReader) {
        let mut mapping = self.mapping.lock().expect("block mapping lock poisoned");
        for (name, entry) in root.inner.parameters.iter() {
            if let ParameterValue::ReferenceColumnName(column) = &entry.value {
                if let Some(position) = reader.column_index(column) {
                    mapping.insert(name.clone(), position);
                }
            }
        }
    }

    /// Per-statement completion: decrement, bail on abort, chain the next
    /// statement or record the failure with its position.
    fn end_of_statement_callback(
        self: Arc<Self>,
        position: usize,
        status: std::result::Result<(), ErrorInfo>,
    ) {
        self.state.statement_finished();
        if self.state.error_aborting() {
            if let Some(root) = self.root() {
                root.maybe_finish();
            }
            return;
        }
        match status {
            Err(info) => {
                let code = info.code();
                let supplemented = info.with_supplement(format!(
                    "{} status:{code}",
                    self.position_tag(position)
                ));
                self.state.try_set_error(supplemented);
                if let Some(root) = self.root() {
                    root.maybe_finish();
                }
            }
            Ok(()) => self.end_of_statement(),
        }
    }

    /// Chain one more statement; when the block is exhausted hand control to
    /// the file executor.
    fn end_of_statement(self: &Arc<Self>) {
        match self.next_statement() {
            (true, false) => {
                if let Some(file) = self.file.upgrade() {
                    file.end_of_block(self);
                }
            }
            _ => {}
        }
    }

    /// Commit this block's transaction asynchronously; the commit counts as
    /// a running statement so the batch cannot finish under it.
    fn commit_block_transaction(&self, root: &BatchExecutor) {
        let Some(handle) = self
            .transaction
            .lock()
            .expect("block transaction lock poisoned")
            .take()
        else {
            return;
        };
        let state = Arc::clone(&self.state);
        let tag = self.position_tag(self.statements_executed.load(Ordering::SeqCst));
        let finish_root = root.clone();
        state.statement_started();
        let submitted = root.inner.db.commit_async(
            &handle,
            CommitOptions {
                auto_dispose: true,
                ..Default::default()
            },
            Box::new(move |status| {
                state.statement_finished();
                if let Err(info) = status {
                    // Serialization failures keep their code; anything else
                    // is a service-level failure of the loader.
                    let error = match info.code() {
                        kvsql_result::ErrorCode::CcException => {
                            Error::CcError(info.message().to_string())
                        }
                        _ => Error::SqlService(format!(
                            "committing load block transaction failed: {}",
                            info.message()
                        )),
                    };
                    state.try_set_error(ErrorInfo::from(&error).with_supplement(tag));
                }
                finish_root.maybe_finish();
            }),
        );
        if let Err(err) = submitted {
            self.state.statement_finished();
            self.fail(
                Error::SqlService(format!("submitting block commit failed: {err}")),
                self.position_tag(self.statements_executed.load(Ordering::SeqCst)),
            );
        }
    }
}
