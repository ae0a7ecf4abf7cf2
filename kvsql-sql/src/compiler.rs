//! Translation from `sqlparser` ASTs into the internal representation.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use kvsql_plan::{
    ColumnDef, CompilerContext, ParameterSet, Plan, PlanKind, PlanMirror, SqlCompiler, SqlType,
    TableDef,
};
use kvsql_result::{Error, Result};
use sqlparser::ast::{self, Statement as SqlStatement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::exec::CompiledBody;
use crate::ir::{CompareOp, Filter, OrderBy, Projection, ScalarExpr, StatementIr};

/// The default compiler implementation.
#[derive(Debug, Default)]
pub struct DefaultSqlCompiler;

impl DefaultSqlCompiler {
    pub fn new() -> Self {
        Self
    }

    fn parse(&self, sql: &str) -> Result<SqlStatement> {
        let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|err| Error::SqlExecution(format!("parse error: {err}")))?;
        match statements.len() {
            1 => Ok(statements.remove(0)),
            0 => Err(Error::SqlExecution("empty statement".into())),
            n => Err(Error::SqlExecution(format!(
                "expected one statement, found {n}"
            ))),
        }
    }

    fn plan_for(&self, ctx: &CompilerContext, mut ir: StatementIr) -> Result<Plan> {
        if let StatementIr::Select {
            table, projections, ..
        } = &mut ir
        {
            // Expand `SELECT *` against the catalog before the plan is
            // frozen.
            if projections
                .iter()
                .any(|p| matches!(p, Projection::Column(name) if name == "*"))
            {
                let def = ctx.schema.find_table(table).ok_or_else(|| {
                    Error::SqlExecution(format!("table '{table}' not found"))
                })?;
                *projections = def
                    .columns
                    .iter()
                    .map(|c| Projection::Column(c.name.clone()))
                    .collect();
            }
        }
        let kind = match &ir {
            StatementIr::CreateTable { .. }
            | StatementIr::CreateIndex { .. }
            | StatementIr::DropTable { .. } => PlanKind::Ddl,
            StatementIr::Select { .. } => PlanKind::Query,
            StatementIr::Insert { .. }
            | StatementIr::Update { .. }
            | StatementIr::Delete { .. } => PlanKind::Write,
        };
        let mirror = match &ir {
            StatementIr::Select {
                table, projections, ..
            } => PlanMirror::query(self.result_shape(ctx, table, projections)?, ir.work_level()),
            _ => PlanMirror::non_query(ir.work_level()),
        };
        Ok(Plan::new(kind, mirror, Arc::new(CompiledBody::new(ir, None))))
    }

    fn result_shape(
        &self,
        ctx: &CompilerContext,
        table: &str,
        projections: &[Projection],
    ) -> Result<SchemaRef> {
        let def = ctx
            .schema
            .find_table(table)
            .ok_or_else(|| Error::SqlExecution(format!("table '{table}' not found")))?;
        let mut fields = Vec::with_capacity(projections.len());
        for projection in projections {
            match projection {
                Projection::CountStar => {
                    fields.push(Field::new("count", arrow::datatypes::DataType::Int64, false));
                }
                Projection::Column(name) => {
                    let (_, column) = def.column(name).ok_or_else(|| {
                        Error::SqlExecution(format!(
                            "column '{name}' not found in table '{table}'"
                        ))
                    })?;
                    fields.push(Field::new(
                        column.name.as_str(),
                        column.sql_type.arrow_type(),
                        column.nullable,
                    ));
                }
            }
        }
        Ok(Arc::new(Schema::new(fields)))
    }

    // ------------------------------------------------------------------
    // AST → IR
    // ------------------------------------------------------------------

    fn translate(&self, statement: SqlStatement) -> Result<StatementIr> {
        match statement {
            SqlStatement::CreateTable(create) => self.translate_create_table(create),
            SqlStatement::CreateIndex(create) => self.translate_create_index(create),
            SqlStatement::Drop {
                object_type: ast::ObjectType::Table,
                names,
                ..
            } => {
                let name = names
                    .first()
                    .ok_or_else(|| Error::SqlExecution("DROP TABLE without a name".into()))?;
                Ok(StatementIr::DropTable {
                    name: object_name(name),
                })
            }
            SqlStatement::Insert(insert) => self.translate_insert(insert),
            SqlStatement::Query(query) => self.translate_query(*query),
            SqlStatement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.translate_update(table, assignments, selection),
            SqlStatement::Delete(delete) => self.translate_delete(delete),
            other => Err(Error::SqlExecution(format!(
                "unsupported statement: {other}"
            ))),
        }
    }

    fn translate_create_table(&self, create: ast::CreateTable) -> Result<StatementIr> {
        let table_name = object_name(&create.name);
        let mut primary_key: Vec<String> = Vec::new();
        let mut columns = Vec::with_capacity(create.columns.len());

        for column in &create.columns {
            let name = ident(&column.name);
            let sql_type = map_data_type(&column.data_type)?;
            let mut nullable = true;
            for option in &column.options {
                match &option.option {
                    ast::ColumnOption::NotNull => nullable = false,
                    ast::ColumnOption::Unique {
                        is_primary: true, ..
                    } => {
                        nullable = false;
                        primary_key.push(name.clone());
                    }
                    _ => {}
                }
            }
            columns.push(ColumnDef {
                name,
                sql_type,
                nullable,
            });
        }

        for constraint in &create.constraints {
            if let ast::TableConstraint::PrimaryKey {
                columns: key_columns,
                ..
            } = constraint
            {
                for key in key_columns {
                    let name = ident(key);
                    if let Some(column) = columns.iter_mut().find(|c| c.name == name) {
                        column.nullable = false;
                    }
                    primary_key.push(name);
                }
            }
        }

        if primary_key.is_empty() {
            return Err(Error::SqlExecution(format!(
                "table '{table_name}' has no primary key"
            )));
        }

        Ok(StatementIr::CreateTable {
            table: TableDef {
                name: table_name,
                definition_id: None,
                columns,
            },
            primary_key,
        })
    }

    fn translate_create_index(&self, create: ast::CreateIndex) -> Result<StatementIr> {
        let name = create
            .name
            .as_ref()
            .map(object_name)
            .ok_or_else(|| Error::SqlExecution("CREATE INDEX requires a name".into()))?;
        let table = object_name(&create.table_name);
        let mut columns = Vec::with_capacity(create.columns.len());
        for column in &create.columns {
            match &column.expr {
                ast::Expr::Identifier(id) => columns.push(ident(id)),
                other => {
                    return Err(Error::SqlExecution(format!(
                        "unsupported index key expression: {other}"
                    )))
                }
            }
        }
        Ok(StatementIr::CreateIndex {
            name,
            table,
            columns,
        })
    }

    fn translate_insert(&self, insert: ast::Insert) -> Result<StatementIr> {
        let table = object_name(&insert.table_name);
        let columns: Vec<String> = insert.columns.iter().map(ident).collect();
        let source = insert
            .source
            .ok_or_else(|| Error::SqlExecution("INSERT without a VALUES source".into()))?;
        let rows = match *source.body {
            ast::SetExpr::Values(values) => {
                let mut rows = Vec::with_capacity(values.rows.len());
                for row in values.rows {
                    let mut exprs = Vec::with_capacity(row.len());
                    for expr in row {
                        exprs.push(scalar_expr(&expr)?);
                    }
                    rows.push(exprs);
                }
                rows
            }
            other => {
                return Err(Error::SqlExecution(format!(
                    "unsupported INSERT source: {other}"
                )))
            }
        };
        Ok(StatementIr::Insert {
            table,
            columns,
            rows,
        })
    }

    fn translate_query(&self, query: ast::Query) -> Result<StatementIr> {
        let order_by = match &query.order_by {
            None => None,
            Some(order) => {
                let expr = order.exprs.first().ok_or_else(|| {
                    Error::SqlExecution("ORDER BY without a sort key".into())
                })?;
                if order.exprs.len() > 1 {
                    return Err(Error::SqlExecution(
                        "only one ORDER BY key is supported".into(),
                    ));
                }
                match &expr.expr {
                    ast::Expr::Identifier(id) => Some(OrderBy {
                        column: ident(id),
                        ascending: expr.asc.unwrap_or(true),
                    }),
                    other => {
                        return Err(Error::SqlExecution(format!(
                            "unsupported ORDER BY expression: {other}"
                        )))
                    }
                }
            }
        };

        let select = match *query.body {
            ast::SetExpr::Select(select) => *select,
            other => {
                return Err(Error::SqlExecution(format!(
                    "unsupported query body: {other}"
                )))
            }
        };
        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(Error::SqlExecution(
                "exactly one table (no joins) is supported".into(),
            ));
        }
        let table = match &select.from[0].relation {
            ast::TableFactor::Table { name, .. } => object_name(name),
            other => {
                return Err(Error::SqlExecution(format!(
                    "unsupported table factor: {other}"
                )))
            }
        };

        let mut projections = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            match item {
                ast::SelectItem::Wildcard(_) => projections.push(Projection::Column("*".into())),
                ast::SelectItem::UnnamedExpr(ast::Expr::Identifier(id)) => {
                    projections.push(Projection::Column(ident(id)))
                }
                ast::SelectItem::UnnamedExpr(ast::Expr::Function(function))
                    if is_count_star(function) =>
                {
                    projections.push(Projection::CountStar)
                }
                other => {
                    return Err(Error::SqlExecution(format!(
                        "unsupported projection: {other}"
                    )))
                }
            }
        }

        let filter = select.selection.as_ref().map(translate_filter).transpose()?;
        Ok(StatementIr::Select {
            table,
            projections,
            filter,
            order_by,
        })
    }

    fn translate_update(
        &self,
        table: ast::TableWithJoins,
        assignments: Vec<ast::Assignment>,
        selection: Option<ast::Expr>,
    ) -> Result<StatementIr> {
        let table = match &table.relation {
            ast::TableFactor::Table { name, .. } => object_name(name),
            other => {
                return Err(Error::SqlExecution(format!(
                    "unsupported UPDATE target: {other}"
                )))
            }
        };
        let mut out = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let column = match &assignment.target {
                ast::AssignmentTarget::ColumnName(name) => object_name(name),
                other => {
                    return Err(Error::SqlExecution(format!(
                        "unsupported assignment target: {other}"
                    )))
                }
            };
            out.push((column, scalar_expr(&assignment.value)?));
        }
        let filter = selection.as_ref().map(translate_filter).transpose()?;
        Ok(StatementIr::Update {
            table,
            assignments: out,
            filter,
        })
    }

    fn translate_delete(&self, delete: ast::Delete) -> Result<StatementIr> {
        let tables = match &delete.from {
            ast::FromTable::WithFromKeyword(tables)
            | ast::FromTable::WithoutKeyword(tables) => tables,
        };
        if tables.len() != 1 {
            return Err(Error::SqlExecution(
                "DELETE from exactly one table is supported".into(),
            ));
        }
        let table = match &tables[0].relation {
            ast::TableFactor::Table { name, .. } => object_name(name),
            other => {
                return Err(Error::SqlExecution(format!(
                    "unsupported DELETE target: {other}"
                )))
            }
        };
        let filter = delete.selection.as_ref().map(translate_filter).transpose()?;
        Ok(StatementIr::Delete { table, filter })
    }
}

impl SqlCompiler for DefaultSqlCompiler {
    fn compile(&self, ctx: &CompilerContext, sql: &str) -> Result<Plan> {
        let statement = self.parse(sql)?;
        let ir = self.translate(statement)?;
        self.plan_for(ctx, ir)
    }

    fn bind(&self, _ctx: &CompilerContext, plan: &Plan, parameters: &ParameterSet) -> Result<Plan> {
        let body = plan
            .body()
            .as_any()
            .downcast_ref::<CompiledBody>()
            .ok_or_else(|| {
                Error::Internal("bind invoked with a plan from another compiler".into())
            })?;
        Ok(Plan::new(
            plan.kind(),
            plan.mirror().clone(),
            Arc::new(body.with_parameters(parameters.clone())),
        ))
    }
}

// ----------------------------------------------------------------------
// AST helpers
// ----------------------------------------------------------------------

fn ident(id: &ast::Ident) -> String {
    id.value.clone()
}

fn object_name(name: &ast::ObjectName) -> String {
    name.to_string()
}

fn is_count_star(function: &ast::Function) -> bool {
    if !object_name(&function.name).eq_ignore_ascii_case("count") {
        return false;
    }
    match &function.args {
        ast::FunctionArguments::List(list) => matches!(
            list.args.first(),
            Some(ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard))
        ),
        _ => false,
    }
}

fn translate_filter(expr: &ast::Expr) -> Result<Filter> {
    let ast::Expr::BinaryOp { left, op, right } = expr else {
        return Err(Error::SqlExecution(format!(
            "unsupported WHERE clause: {expr}"
        )));
    };
    let column = match left.as_ref() {
        ast::Expr::Identifier(id) => ident(id),
        other => {
            return Err(Error::SqlExecution(format!(
                "WHERE must compare a column: {other}"
            )))
        }
    };
    let op = match op {
        ast::BinaryOperator::Eq => CompareOp::Eq,
        ast::BinaryOperator::NotEq => CompareOp::Ne,
        ast::BinaryOperator::Lt => CompareOp::Lt,
        ast::BinaryOperator::LtEq => CompareOp::Le,
        ast::BinaryOperator::Gt => CompareOp::Gt,
        ast::BinaryOperator::GtEq => CompareOp::Ge,
        other => {
            return Err(Error::SqlExecution(format!(
                "unsupported comparison operator: {other}"
            )))
        }
    };
    Ok(Filter {
        column,
        op,
        value: scalar_expr(right)?,
    })
}

fn scalar_expr(expr: &ast::Expr) -> Result<ScalarExpr> {
    match expr {
        ast::Expr::Value(ast::Value::Placeholder(name)) => {
            let trimmed = name.trim_start_matches([':', '$', '?']);
            Ok(ScalarExpr::Parameter(trimmed.to_string()))
        }
        ast::Expr::Value(value) => Ok(ScalarExpr::Literal(literal(value, false)?)),
        ast::Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            ast::Expr::Value(value) => Ok(ScalarExpr::Literal(literal(value, true)?)),
            other => Err(Error::SqlExecution(format!(
                "unsupported negated expression: {other}"
            ))),
        },
        other => Err(Error::SqlExecution(format!(
            "unsupported scalar expression: {other}"
        ))),
    }
}

fn literal(value: &ast::Value, negate: bool) -> Result<Option<kvsql_plan::Value>> {
    use kvsql_plan::Value;
    match value {
        ast::Value::Null => Ok(None),
        ast::Value::Boolean(b) => Ok(Some(Value::Boolean(*b))),
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
            Ok(Some(Value::Text(s.clone())))
        }
        ast::Value::Number(text, _) => {
            if let Ok(int) = text.parse::<i64>() {
                let int = if negate { -int } else { int };
                return Ok(Some(Value::Int8(int)));
            }
            let float: f64 = text
                .parse()
                .map_err(|_| Error::SqlExecution(format!("invalid numeric literal: {text}")))?;
            let float = if negate { -float } else { float };
            Ok(Some(Value::Float8(float)))
        }
        other => Err(Error::SqlExecution(format!(
            "unsupported literal: {other}"
        ))),
    }
}

fn map_data_type(data_type: &ast::DataType) -> Result<SqlType> {
    use ast::DataType;
    Ok(match data_type {
        DataType::Int(_) | DataType::Integer(_) => SqlType::Int4,
        DataType::BigInt(_) => SqlType::Int8,
        DataType::Real => SqlType::Float4,
        DataType::Float(_) | DataType::Double | DataType::DoublePrecision => SqlType::Float8,
        DataType::Boolean => SqlType::Boolean,
        DataType::Varchar(length) | DataType::CharacterVarying(length) => SqlType::Text {
            length: character_length(length),
        },
        DataType::Char(length) | DataType::Character(length) => SqlType::Text {
            length: character_length(length),
        },
        DataType::Text | DataType::String(_) => SqlType::text(),
        DataType::Binary(_) | DataType::Varbinary(_) | DataType::Bytea => SqlType::Bytes,
        DataType::Decimal(info) | DataType::Numeric(info) => {
            let (precision, scale) = exact_number(info);
            SqlType::Decimal { precision, scale }
        }
        other => {
            return Err(Error::SqlExecution(format!(
                "unsupported column type: {other}"
            )))
        }
    })
}

fn character_length(length: &Option<ast::CharacterLength>) -> Option<u32> {
    match length {
        Some(ast::CharacterLength::IntegerLength { length, .. }) => Some(*length as u32),
        _ => None,
    }
}

fn exact_number(info: &ast::ExactNumberInfo) -> (u8, u8) {
    match info {
        ast::ExactNumberInfo::None => (38, 0),
        ast::ExactNumberInfo::Precision(precision) => (*precision as u8, 0),
        ast::ExactNumberInfo::PrecisionAndScale(precision, scale) => {
            (*precision as u8, *scale as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsql_plan::{CompileOptions, IndexDef, SchemaView};

    struct StubSchema {
        table: Arc<TableDef>,
    }

    impl StubSchema {
        fn new() -> Self {
            Self {
                table: Arc::new(TableDef {
                    name: "t".into(),
                    definition_id: Some(1),
                    columns: vec![
                        ColumnDef {
                            name: "c0".into(),
                            sql_type: SqlType::Int8,
                            nullable: false,
                        },
                        ColumnDef {
                            name: "c1".into(),
                            sql_type: SqlType::Float8,
                            nullable: true,
                        },
                    ],
                }),
            }
        }
    }

    impl SchemaView for StubSchema {
        fn find_table(&self, name: &str) -> Option<Arc<TableDef>> {
            (name == "t").then(|| Arc::clone(&self.table))
        }
        fn find_index(&self, _name: &str) -> Option<Arc<IndexDef>> {
            None
        }
        fn primary_index(&self, _table: &str) -> Option<Arc<IndexDef>> {
            None
        }
        fn secondary_indexes(&self, _table: &str) -> Vec<Arc<IndexDef>> {
            Vec::new()
        }
        fn table_names(&self) -> Vec<String> {
            vec!["t".into()]
        }
    }

    fn context() -> CompilerContext {
        CompilerContext::new(Arc::new(StubSchema::new()), CompileOptions::default())
    }

    fn compile(sql: &str) -> Result<Plan> {
        DefaultSqlCompiler::new().compile(&context(), sql)
    }

    #[test]
    fn test_plan_kinds() {
        assert_eq!(
            compile("CREATE TABLE u (a INT PRIMARY KEY)").unwrap().kind(),
            PlanKind::Ddl
        );
        assert_eq!(
            compile("INSERT INTO t VALUES (1, 2.0)").unwrap().kind(),
            PlanKind::Write
        );
        assert_eq!(
            compile("SELECT c0 FROM t").unwrap().kind(),
            PlanKind::Query
        );
        assert_eq!(compile("DELETE FROM t").unwrap().kind(), PlanKind::Write);
    }

    #[test]
    fn test_query_mirror_reports_result_shape() {
        let plan = compile("SELECT c0, c1 FROM t").unwrap();
        let shape = plan.result_shape().expect("query has a result shape");
        assert_eq!(shape.fields().len(), 2);
        assert_eq!(shape.field(0).name(), "c0");
        assert!(!shape.field(0).is_nullable());
        assert_eq!(
            shape.field(1).data_type(),
            &arrow::datatypes::DataType::Float64
        );

        let wildcard = compile("SELECT * FROM t").unwrap();
        assert_eq!(wildcard.result_shape().unwrap().fields().len(), 2);

        assert!(compile("INSERT INTO t VALUES (1, 2.0)")
            .unwrap()
            .result_shape()
            .is_none());
    }

    #[test]
    fn test_point_reads_are_lighter_than_scans() {
        let point = compile("SELECT c0 FROM t WHERE c0 = 1").unwrap();
        let scan = compile("SELECT c0 FROM t WHERE c0 > 1").unwrap();
        assert!(point.work_level() < scan.work_level());
    }

    #[test]
    fn test_unsupported_shapes_fail_compilation() {
        assert!(compile("SELECT a FROM t JOIN u ON 1 = 1").is_err());
        assert!(compile("CREATE TABLE u (a INT)").is_err());
        assert!(compile("SELECT c0 FROM missing").is_err());
        assert!(compile("this is not sql").is_err());
    }

    #[test]
    fn test_bind_keeps_mirror_and_accepts_parameters() {
        let compiler = DefaultSqlCompiler::new();
        let plan = compiler
            .compile(&context(), "INSERT INTO t VALUES (:p0, :p1)")
            .unwrap();
        let mut params = ParameterSet::new();
        params.set_value("p0", kvsql_plan::Value::Int8(1));
        params.set_null("p1", SqlType::Float8);
        let bound = compiler.bind(&context(), &plan, &params).unwrap();
        assert_eq!(bound.kind(), PlanKind::Write);
        assert_eq!(bound.work_level(), plan.work_level());
        assert!(bound.explain_json().contains("\"bound\":true"));
    }
}
