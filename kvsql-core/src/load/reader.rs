//! Columnar file reader seam and the Arrow IPC implementation.
//!
//! A file is a sequence of blocks (row groups); one block maps to one block
//! executor. The loader consumes rows as typed field references through
//! [`BlockRowReader`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::record_batch::RecordBatch;
use kvsql_plan::Value;
use kvsql_result::{Error, Result};
use rustc_hash::FxHashMap;

/// One materialized row.
pub struct RowData {
    values: Vec<Option<Value>>,
}

impl RowData {
    pub fn value_at(&self, position: usize) -> Result<Option<Value>> {
        self.values.get(position).cloned().ok_or_else(|| {
            Error::LoadFile(format!(
                "column position {position} out of range ({} columns)",
                self.values.len()
            ))
        })
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }
}

/// Row iterator over one block.
pub trait BlockRowReader: Send {
    /// Position of a named column in this block's schema.
    fn column_index(&self, name: &str) -> Option<usize>;

    fn next_row(&mut self) -> Result<Option<RowData>>;
}

/// One opened columnar file.
pub trait ColumnarFileReader: Send + Sync {
    fn path(&self) -> &Path;

    /// Number of row groups.
    fn block_count(&self) -> usize;

    fn open_block(&self, index: usize) -> Result<Box<dyn BlockRowReader>>;
}

/// Opens columnar files; injectable for tests.
pub trait ColumnarReaderFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn ColumnarFileReader>>;
}

/// Arrow IPC file format: one IPC record batch is one block.
#[derive(Debug, Default)]
pub struct ArrowIpcReaderFactory;

impl ColumnarReaderFactory for ArrowIpcReaderFactory {
    fn open(&self, path: &Path) -> Result<Arc<dyn ColumnarFileReader>> {
        let file = File::open(path)
            .map_err(|err| Error::LoadFile(format!("opening {} failed: {err}", path.display())))?;
        let reader = arrow::ipc::reader::FileReader::try_new(file, None).map_err(|err| {
            Error::LoadFile(format!("reading {} failed: {err}", path.display()))
        })?;
        Ok(Arc::new(ArrowIpcFile {
            path: path.to_path_buf(),
            block_count: reader.num_batches(),
        }))
    }
}

struct ArrowIpcFile {
    path: PathBuf,
    block_count: usize,
}

impl ColumnarFileReader for ArrowIpcFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn open_block(&self, index: usize) -> Result<Box<dyn BlockRowReader>> {
        let file = File::open(&self.path).map_err(|err| {
            Error::LoadFile(format!("opening {} failed: {err}", self.path.display()))
        })?;
        let reader = arrow::ipc::reader::FileReader::try_new(file, None).map_err(|err| {
            Error::LoadFile(format!("reading {} failed: {err}", self.path.display()))
        })?;
        let mut batches = reader.skip(index);
        let batch = batches
            .next()
            .ok_or_else(|| {
                Error::LoadFile(format!(
                    "block {index} out of range in {}",
                    self.path.display()
                ))
            })?
            .map_err(|err| {
                Error::LoadFile(format!(
                    "decoding block {index} of {} failed: {err}",
                    self.path.display()
                ))
            })?;

        let mut name_to_index = FxHashMap::default();
        for (position, field) in batch.schema().fields().iter().enumerate() {
            name_to_index.insert(field.name().clone(), position);
        }
        Ok(Box::new(ArrowBlockReader {
            batch,
            row: 0,
            name_to_index,
        }))
    }
}

struct ArrowBlockReader {
    batch: RecordBatch,
    row: usize,
    name_to_index: FxHashMap<String, usize>,
}

impl BlockRowReader for ArrowBlockReader {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    fn next_row(&mut self) -> Result<Option<RowData>> {
        if self.row >= self.batch.num_rows() {
            return Ok(None);
        }
        let row = self.row;
        self.row += 1;
        let mut values = Vec::with_capacity(self.batch.num_columns());
        for column in self.batch.columns() {
            values.push(value_from_array(column.as_ref(), row)?);
        }
        Ok(Some(RowData { values }))
    }
}

fn value_from_array(array: &dyn Array, row: usize) -> Result<Option<Value>> {
    use arrow::datatypes::DataType;

    if array.is_null(row) {
        return Ok(None);
    }
    let value = match array.data_type() {
        DataType::Boolean => Value::Boolean(
            array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .expect("type checked")
                .value(row),
        ),
        DataType::Int32 => Value::Int4(
            array
                .as_any()
                .downcast_ref::<Int32Array>()
                .expect("type checked")
                .value(row),
        ),
        DataType::Int64 => Value::Int8(
            array
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("type checked")
                .value(row),
        ),
        DataType::Float32 => Value::Float4(
            array
                .as_any()
                .downcast_ref::<Float32Array>()
                .expect("type checked")
                .value(row),
        ),
        DataType::Float64 => Value::Float8(
            array
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("type checked")
                .value(row),
        ),
        DataType::Utf8 => Value::Text(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("type checked")
                .value(row)
                .to_string(),
        ),
        DataType::Binary => Value::Bytes(
            array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .expect("type checked")
                .value(row)
                .to_vec(),
        ),
        other => {
            return Err(Error::LoadFile(format!(
                "unsupported column type {other:?} in load input"
            )))
        }
    };
    Ok(Some(value))
}
