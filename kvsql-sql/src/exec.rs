//! Plan bodies: execution of the compiled statement forms against the KV
//! transaction in the request context.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder, Int32Builder,
    Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use kvsql_kv::{KvError, KvTransaction, PutOperation, ScanRange};
use kvsql_plan::codec::{decode_key, decode_row, encode_key, encode_row};
use kvsql_plan::{
    ExecContext, IndexDef, IndexKey, ParameterSet, PlanBody, SqlType, TableDef, Value,
};
use kvsql_result::{Error, Result};

use crate::ir::{Filter, Projection, ScalarExpr, StatementIr};

/// A compiled statement, optionally with bound parameters.
pub(crate) struct CompiledBody {
    ir: Arc<StatementIr>,
    parameters: Option<ParameterSet>,
}

impl CompiledBody {
    pub(crate) fn new(ir: StatementIr, parameters: Option<ParameterSet>) -> Self {
        Self {
            ir: Arc::new(ir),
            parameters,
        }
    }

    pub(crate) fn with_parameters(&self, parameters: ParameterSet) -> Self {
        Self {
            ir: Arc::clone(&self.ir),
            parameters: Some(parameters),
        }
    }

    fn params(&self) -> Option<&ParameterSet> {
        self.parameters.as_ref()
    }
}

impl PlanBody for CompiledBody {
    fn run(&self, ctx: &dyn ExecContext) -> Result<()> {
        match self.ir.as_ref() {
            StatementIr::CreateTable { table, primary_key } => {
                run_create_table(ctx, table, primary_key)
            }
            StatementIr::CreateIndex {
                name,
                table,
                columns,
            } => run_create_index(ctx, name, table, columns),
            StatementIr::DropTable { name } => ctx.schema_ops().drop_table(name),
            StatementIr::Insert {
                table,
                columns,
                rows,
            } => run_insert(ctx, self.params(), table, columns, rows),
            StatementIr::Select {
                table,
                projections,
                filter,
                order_by,
            } => run_select(ctx, self.params(), table, projections, filter, order_by),
            StatementIr::Update {
                table,
                assignments,
                filter,
            } => run_update(ctx, self.params(), table, assignments, filter),
            StatementIr::Delete { table, filter } => {
                run_delete(ctx, self.params(), table, filter)
            }
        }
    }

    fn explain_json(&self) -> String {
        let (kind, table) = match self.ir.as_ref() {
            StatementIr::CreateTable { table, .. } => ("create_table", table.name.clone()),
            StatementIr::CreateIndex { table, .. } => ("create_index", table.clone()),
            StatementIr::DropTable { name } => ("drop_table", name.clone()),
            StatementIr::Insert { table, .. } => ("insert", table.clone()),
            StatementIr::Select { table, .. } => ("select", table.clone()),
            StatementIr::Update { table, .. } => ("update", table.clone()),
            StatementIr::Delete { table, .. } => ("delete", table.clone()),
        };
        serde_json::json!({
            "kind": kind,
            "table": table,
            "bound": self.parameters.is_some(),
        })
        .to_string()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ----------------------------------------------------------------------
// DDL
// ----------------------------------------------------------------------

fn run_create_table(ctx: &dyn ExecContext, table: &TableDef, primary_key: &[String]) -> Result<()> {
    let ops = ctx.schema_ops();
    ops.create_table(table.clone())?;

    let values = table
        .columns
        .iter()
        .filter(|c| !primary_key.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();
    let primary = IndexDef {
        name: table.name.clone(),
        table: table.name.clone(),
        definition_id: 0,
        keys: primary_key.iter().map(IndexKey::ascending).collect(),
        values,
        primary: true,
    };
    if let Err(err) = ops.create_index(primary) {
        // A table without its primary index is unusable; take it back out.
        let _ = ops.drop_table(&table.name);
        return Err(err);
    }
    Ok(())
}

fn run_create_index(
    ctx: &dyn ExecContext,
    name: &str,
    table: &str,
    columns: &[String],
) -> Result<()> {
    ctx.schema_ops().create_index(IndexDef {
        name: name.to_string(),
        table: table.to_string(),
        definition_id: 0,
        keys: columns.iter().map(IndexKey::ascending).collect(),
        values: Vec::new(),
        primary: false,
    })
}

// ----------------------------------------------------------------------
// Table access helper
// ----------------------------------------------------------------------

struct TableAccess {
    table: Arc<TableDef>,
    primary: Arc<IndexDef>,
    secondaries: Vec<Arc<IndexDef>>,
    /// Positions of the primary key columns within the table's column list.
    key_positions: Vec<usize>,
    /// Positions of the primary index's value columns.
    value_positions: Vec<usize>,
}

impl TableAccess {
    fn open(ctx: &dyn ExecContext, table: &str) -> Result<Self> {
        let schema = ctx.schema_view();
        let def = schema
            .find_table(table)
            .ok_or_else(|| Error::TargetNotFound(format!("table '{table}' not found")))?;
        let primary = schema.primary_index(table).ok_or_else(|| {
            Error::TargetNotFound(format!("table '{table}' has no primary index"))
        })?;
        let secondaries = schema.secondary_indexes(table);

        let position_of = |name: &str| -> Result<usize> {
            def.column(name)
                .map(|(position, _)| position)
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "index of table '{table}' names unknown column '{name}'"
                    ))
                })
        };
        let key_positions = primary
            .keys
            .iter()
            .map(|key| position_of(&key.column))
            .collect::<Result<Vec<_>>>()?;
        let value_positions = primary
            .values
            .iter()
            .map(|name| position_of(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            table: def,
            primary,
            secondaries,
            key_positions,
            value_positions,
        })
    }

    fn key_types(&self) -> Vec<SqlType> {
        self.key_positions
            .iter()
            .map(|&position| self.table.columns[position].sql_type.clone())
            .collect()
    }

    fn primary_key_bytes(&self, row: &[Option<Value>]) -> Result<Vec<u8>> {
        let components: Vec<Option<Value>> = self
            .key_positions
            .iter()
            .map(|&position| row[position].clone())
            .collect();
        encode_key(&components)
    }

    fn primary_value_bytes(&self, row: &[Option<Value>]) -> Vec<u8> {
        let values: Vec<Option<Value>> = self
            .value_positions
            .iter()
            .map(|&position| row[position].clone())
            .collect();
        encode_row(&values)
    }

    /// Secondary entry key: the indexed columns followed by the full primary
    /// key, so entries are unique per row and locate their base row.
    fn secondary_key_bytes(&self, index: &IndexDef, row: &[Option<Value>]) -> Result<Vec<u8>> {
        let mut components = Vec::with_capacity(index.keys.len() + self.key_positions.len());
        for key in &index.keys {
            let (position, _) = self.table.column(&key.column).ok_or_else(|| {
                Error::Internal(format!(
                    "secondary index '{}' names unknown column '{}'",
                    index.name, key.column
                ))
            })?;
            components.push(row[position].clone());
        }
        for &position in &self.key_positions {
            components.push(row[position].clone());
        }
        encode_key(&components)
    }

    /// Rebuild a full row (table column order) from a primary index entry.
    fn row_from_entry(&self, key: &[u8], value: &[u8]) -> Result<Vec<Option<Value>>> {
        let key_values = decode_key(&self.key_types(), key)?;
        let row_values = decode_row(value)?;
        let mut row = vec![None; self.table.columns.len()];
        for (&position, value) in self.key_positions.iter().zip(key_values) {
            row[position] = value;
        }
        for (&position, value) in self.value_positions.iter().zip(row_values) {
            row[position] = value;
        }
        Ok(row)
    }

    /// Scan the whole primary index, yielding (entry key, full row).
    fn scan_rows(
        &self,
        tx: &Arc<dyn KvTransaction>,
    ) -> Result<Vec<(Vec<u8>, Vec<Option<Value>>)>> {
        let entries = tx
            .scan(&self.primary.name, &ScanRange::full())
            .map_err(kv_error)?;
        entries
            .into_iter()
            .map(|(key, value)| {
                let row = self.row_from_entry(&key, &value)?;
                Ok((key, row))
            })
            .collect()
    }
}

fn transaction_of(ctx: &dyn ExecContext) -> Result<Arc<dyn KvTransaction>> {
    ctx.kv_transaction().ok_or_else(|| {
        Error::SqlExecution("statement requires a transaction but none is attached".into())
    })
}

fn kv_error(err: KvError) -> Error {
    match err {
        KvError::InactiveTransaction => {
            Error::InactiveTransaction("the transaction is no longer active".into())
        }
        KvError::SerializationFailure => Error::CcError("serialization failure".into()),
        KvError::NotFound => Error::NotFound("storage entry not found".into()),
        other => Error::SqlExecution(format!("storage operation failed: {other}")),
    }
}

// ----------------------------------------------------------------------
// DML
// ----------------------------------------------------------------------

fn run_insert(
    ctx: &dyn ExecContext,
    params: Option<&ParameterSet>,
    table: &str,
    columns: &[String],
    rows: &[Vec<ScalarExpr>],
) -> Result<()> {
    let access = TableAccess::open(ctx, table)?;
    let tx = transaction_of(ctx)?;

    // Target positions: the named column list, or every column in order.
    let positions: Vec<usize> = if columns.is_empty() {
        (0..access.table.columns.len()).collect()
    } else {
        columns
            .iter()
            .map(|name| {
                access
                    .table
                    .column(name)
                    .map(|(position, _)| position)
                    .ok_or_else(|| {
                        Error::SqlExecution(format!(
                            "column '{name}' not found in table '{table}'"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?
    };

    let mut inserted = 0u64;
    for exprs in rows {
        if exprs.len() != positions.len() {
            return Err(Error::SqlExecution(format!(
                "INSERT row has {} values for {} columns",
                exprs.len(),
                positions.len()
            )));
        }
        let mut row: Vec<Option<Value>> = vec![None; access.table.columns.len()];
        for (&position, expr) in positions.iter().zip(exprs) {
            let column = &access.table.columns[position];
            row[position] = match expr.eval(params)? {
                Some(value) => Some(coerce_value(value, &column.sql_type, &column.name)?),
                None => None,
            };
        }
        check_nullability(&access.table, &row)?;

        let key = access.primary_key_bytes(&row)?;
        if tx.get(&access.primary.name, &key).map_err(kv_error)?.is_some() {
            return Err(Error::UniqueConstraintViolation(format!(
                "duplicate primary key in table '{table}'"
            )));
        }
        let value = access.primary_value_bytes(&row);
        match tx.put(&access.primary.name, &key, &value, PutOperation::Create) {
            Ok(()) => {}
            Err(KvError::AlreadyExists) => {
                return Err(Error::UniqueConstraintViolation(format!(
                    "duplicate primary key in table '{table}'"
                )))
            }
            Err(err) => return Err(kv_error(err)),
        }
        for secondary in &access.secondaries {
            let secondary_key = access.secondary_key_bytes(secondary, &row)?;
            tx.put(&secondary.name, &secondary_key, &[], PutOperation::CreateOrUpdate)
                .map_err(kv_error)?;
        }
        inserted += 1;
    }
    ctx.stats().add_inserted(inserted);
    Ok(())
}

fn run_select(
    ctx: &dyn ExecContext,
    params: Option<&ParameterSet>,
    table: &str,
    projections: &[Projection],
    filter: &Option<Filter>,
    order_by: &Option<crate::ir::OrderBy>,
) -> Result<()> {
    let access = TableAccess::open(ctx, table)?;
    let tx = transaction_of(ctx)?;

    let mut rows: Vec<Vec<Option<Value>>> = access
        .scan_rows(&tx)?
        .into_iter()
        .map(|(_, row)| row)
        .collect();
    if let Some(filter) = filter {
        let predicate = CompiledFilter::build(&access, params, filter)?;
        rows.retain(|row| predicate.matches(row));
    }

    if let Some(order) = order_by {
        let (position, _) = access.table.column(&order.column).ok_or_else(|| {
            Error::SqlExecution(format!(
                "ORDER BY column '{}' not found in table '{table}'",
                order.column
            ))
        })?;
        rows.sort_by(|a, b| {
            let ordering = match (&a[position], &b[position]) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => x.compare(y).unwrap_or(std::cmp::Ordering::Equal),
            };
            if order.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }

    if projections.iter().any(|p| matches!(p, Projection::CountStar)) {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new(
            "count",
            DataType::Int64,
            false,
        )]));
        let mut builder = Int64Builder::with_capacity(1);
        builder.append_value(rows.len() as i64);
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(builder.finish()) as ArrayRef],
        )?;
        if let Some(channel) = ctx.channel() {
            channel.write(batch)?;
        }
        ctx.stats().add_fetched(1);
        return Ok(());
    }

    let mut positions = Vec::with_capacity(projections.len());
    let mut fields = Vec::with_capacity(projections.len());
    for projection in projections {
        let Projection::Column(name) = projection else {
            continue;
        };
        let (position, column) = access.table.column(name).ok_or_else(|| {
            Error::SqlExecution(format!("column '{name}' not found in table '{table}'"))
        })?;
        positions.push(position);
        fields.push(Field::new(
            column.name.as_str(),
            column.sql_type.arrow_type(),
            column.nullable,
        ));
    }
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    let block_size = ctx.scan_block_size().max(1);
    let mut fetched = 0u64;
    for chunk in rows.chunks(block_size) {
        let batch = build_batch(&schema, chunk, &positions)?;
        fetched += batch.num_rows() as u64;
        if let Some(channel) = ctx.channel() {
            channel.write(batch)?;
        }
    }
    ctx.stats().add_fetched(fetched);
    Ok(())
}

fn run_update(
    ctx: &dyn ExecContext,
    params: Option<&ParameterSet>,
    table: &str,
    assignments: &[(String, ScalarExpr)],
    filter: &Option<Filter>,
) -> Result<()> {
    let access = TableAccess::open(ctx, table)?;
    let tx = transaction_of(ctx)?;

    let mut entries = access.scan_rows(&tx)?;
    if let Some(filter) = filter {
        let predicate = CompiledFilter::build(&access, params, filter)?;
        entries.retain(|(_, row)| predicate.matches(row));
    }

    let mut updated = 0u64;
    for (old_key, old_row) in entries {
        let mut new_row = old_row.clone();
        for (name, expr) in assignments {
            let (position, column) = access.table.column(name).ok_or_else(|| {
                Error::SqlExecution(format!("column '{name}' not found in table '{table}'"))
            })?;
            new_row[position] = match expr.eval(params)? {
                Some(value) => Some(coerce_value(value, &column.sql_type, &column.name)?),
                None => None,
            };
        }
        check_nullability(&access.table, &new_row)?;

        // Encode every secondary key first so an oversized value fails the
        // statement before any entry is written.
        let mut secondary_moves = Vec::with_capacity(access.secondaries.len());
        for secondary in &access.secondaries {
            let old_secondary = access.secondary_key_bytes(secondary, &old_row)?;
            let new_secondary = access.secondary_key_bytes(secondary, &new_row)?;
            secondary_moves.push((secondary, old_secondary, new_secondary));
        }

        let new_key = access.primary_key_bytes(&new_row)?;
        let new_value = access.primary_value_bytes(&new_row);
        if new_key != old_key {
            if tx
                .get(&access.primary.name, &new_key)
                .map_err(kv_error)?
                .is_some()
            {
                return Err(Error::UniqueConstraintViolation(format!(
                    "duplicate primary key in table '{table}'"
                )));
            }
            tx.remove(&access.primary.name, &old_key).map_err(kv_error)?;
            tx.put(&access.primary.name, &new_key, &new_value, PutOperation::Create)
                .map_err(kv_error)?;
        } else {
            tx.put(
                &access.primary.name,
                &old_key,
                &new_value,
                PutOperation::CreateOrUpdate,
            )
            .map_err(kv_error)?;
        }
        for (secondary, old_secondary, new_secondary) in secondary_moves {
            if old_secondary != new_secondary {
                tx.remove(&secondary.name, &old_secondary).map_err(kv_error)?;
            }
            tx.put(&secondary.name, &new_secondary, &[], PutOperation::CreateOrUpdate)
                .map_err(kv_error)?;
        }
        updated += 1;
    }
    ctx.stats().add_updated(updated);
    Ok(())
}

fn run_delete(
    ctx: &dyn ExecContext,
    params: Option<&ParameterSet>,
    table: &str,
    filter: &Option<Filter>,
) -> Result<()> {
    let access = TableAccess::open(ctx, table)?;
    let tx = transaction_of(ctx)?;

    let mut entries = access.scan_rows(&tx)?;
    if let Some(filter) = filter {
        let predicate = CompiledFilter::build(&access, params, filter)?;
        entries.retain(|(_, row)| predicate.matches(row));
    }

    let mut deleted = 0u64;
    for (key, row) in entries {
        tx.remove(&access.primary.name, &key).map_err(kv_error)?;
        for secondary in &access.secondaries {
            let secondary_key = access.secondary_key_bytes(secondary, &row)?;
            tx.remove(&secondary.name, &secondary_key).map_err(kv_error)?;
        }
        deleted += 1;
    }
    ctx.stats().add_deleted(deleted);
    Ok(())
}

// ----------------------------------------------------------------------
// Shared evaluation helpers
// ----------------------------------------------------------------------

/// A WHERE predicate with its column position and comparand resolved once.
struct CompiledFilter {
    position: usize,
    op: crate::ir::CompareOp,
    comparand: Option<Value>,
}

impl CompiledFilter {
    fn build(
        access: &TableAccess,
        params: Option<&ParameterSet>,
        filter: &Filter,
    ) -> Result<Self> {
        let (position, _) = access.table.column(&filter.column).ok_or_else(|| {
            Error::SqlExecution(format!(
                "WHERE column '{}' not found in table '{}'",
                filter.column, access.table.name
            ))
        })?;
        Ok(Self {
            position,
            op: filter.op,
            comparand: filter.value.eval(params)?,
        })
    }

    fn matches(&self, row: &[Option<Value>]) -> bool {
        match (&row[self.position], &self.comparand) {
            // SQL three-valued logic: a comparison with NULL never matches.
            (Some(left), Some(right)) => self.op.matches(left.compare(right)),
            _ => false,
        }
    }
}

fn check_nullability(table: &TableDef, row: &[Option<Value>]) -> Result<()> {
    for (column, value) in table.columns.iter().zip(row) {
        if value.is_none() && !column.nullable {
            return Err(Error::SqlExecution(format!(
                "null value in non-nullable column '{}'",
                column.name
            )));
        }
    }
    Ok(())
}

fn coerce_value(value: Value, target: &SqlType, column: &str) -> Result<Value> {
    let mismatch = |value: &Value| {
        Error::ValueEvaluation(format!(
            "cannot assign {} to column '{column}' of type {target}",
            value.sql_type()
        ))
    };
    Ok(match (target, value) {
        (SqlType::Boolean, Value::Boolean(v)) => Value::Boolean(v),
        (SqlType::Int4, Value::Int4(v)) => Value::Int4(v),
        (SqlType::Int4, Value::Int8(v)) => Value::Int4(
            i32::try_from(v)
                .map_err(|_| Error::ValueEvaluation(format!("{v} out of range for INT")))?,
        ),
        (SqlType::Int8, Value::Int8(v)) => Value::Int8(v),
        (SqlType::Int8, Value::Int4(v)) => Value::Int8(v as i64),
        (SqlType::Float4, Value::Float4(v)) => Value::Float4(v),
        (SqlType::Float4, Value::Float8(v)) => Value::Float4(v as f32),
        (SqlType::Float4, Value::Int4(v)) => Value::Float4(v as f32),
        (SqlType::Float4, Value::Int8(v)) => Value::Float4(v as f32),
        (SqlType::Float8, Value::Float8(v)) => Value::Float8(v),
        (SqlType::Float8, Value::Float4(v)) => Value::Float8(v as f64),
        (SqlType::Float8, Value::Int4(v)) => Value::Float8(v as f64),
        (SqlType::Float8, Value::Int8(v)) => Value::Float8(v as f64),
        (SqlType::Text { length }, Value::Text(v)) => {
            if let Some(limit) = length {
                if v.chars().count() > *limit as usize {
                    return Err(Error::ValueTooLong(format!(
                        "value for column '{column}' exceeds {limit} characters"
                    )));
                }
            }
            Value::Text(v)
        }
        (SqlType::Bytes, Value::Bytes(v)) => Value::Bytes(v),
        (SqlType::Decimal { scale, .. }, Value::Int8(v)) => Value::Decimal {
            unscaled: v
                .checked_mul(10i64.pow(*scale as u32))
                .ok_or_else(|| Error::ValueEvaluation(format!("{v} out of decimal range")))?,
            scale: *scale,
        },
        (SqlType::Decimal { scale, .. }, Value::Int4(v)) => Value::Decimal {
            unscaled: (v as i64)
                .checked_mul(10i64.pow(*scale as u32))
                .ok_or_else(|| Error::ValueEvaluation(format!("{v} out of decimal range")))?,
            scale: *scale,
        },
        (SqlType::Decimal { scale, .. }, Value::Decimal { unscaled, scale: s })
            if s == *scale =>
        {
            Value::Decimal {
                unscaled,
                scale: s,
            }
        }
        (_, value) => return Err(mismatch(&value)),
    })
}

fn build_batch(
    schema: &SchemaRef,
    rows: &[Vec<Option<Value>>],
    positions: &[usize],
) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(positions.len());
    for (field, &position) in schema.fields().iter().zip(positions) {
        let array: ArrayRef = match field.data_type() {
            DataType::Boolean => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    match &row[position] {
                        Some(Value::Boolean(v)) => builder.append_value(*v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Int32 => {
                let mut builder = Int32Builder::with_capacity(rows.len());
                for row in rows {
                    match &row[position] {
                        Some(Value::Int4(v)) => builder.append_value(*v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Int64 => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    match &row[position] {
                        Some(Value::Int8(v)) => builder.append_value(*v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Float32 => {
                let mut builder = Float32Builder::with_capacity(rows.len());
                for row in rows {
                    match &row[position] {
                        Some(Value::Float4(v)) => builder.append_value(*v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Float64 => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    match &row[position] {
                        Some(Value::Float8(v)) => builder.append_value(*v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Utf8 => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match &row[position] {
                        Some(Value::Text(v)) => builder.append_value(v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            DataType::Binary => {
                let mut builder = BinaryBuilder::new();
                for row in rows {
                    match &row[position] {
                        Some(Value::Bytes(v)) => builder.append_value(v),
                        None => builder.append_null(),
                        other => return Err(type_skew(field.name(), other)),
                    }
                }
                Arc::new(builder.finish())
            }
            other => {
                return Err(Error::Internal(format!(
                    "no column builder for result type {other:?}"
                )))
            }
        };
        arrays.push(array);
    }
    RecordBatch::try_new(Arc::clone(schema), arrays).map_err(Error::Arrow)
}

fn type_skew(column: &str, value: &Option<Value>) -> Error {
    Error::Internal(format!(
        "stored value {value:?} does not match the declared type of column '{column}'"
    ))
}
