//! Internal statement representation shared by the compiler and the plan
//! bodies.

use std::cmp::Ordering;

use kvsql_plan::{ParameterSet, ParameterValue, TableDef, Value};
use kvsql_result::{Error, Result};

/// A literal or a named host-variable reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScalarExpr {
    Literal(Option<Value>),
    Parameter(String),
}

impl ScalarExpr {
    /// Evaluate against the bound parameter set.
    pub(crate) fn eval(&self, parameters: Option<&ParameterSet>) -> Result<Option<Value>> {
        match self {
            ScalarExpr::Literal(value) => Ok(value.clone()),
            ScalarExpr::Parameter(name) => {
                let parameters = parameters.ok_or_else(|| {
                    Error::ValueEvaluation(format!(
                        "statement references parameter :{name} but no parameters were bound"
                    ))
                })?;
                let entry = parameters.get(name).ok_or_else(|| {
                    Error::ValueEvaluation(format!("parameter :{name} is not bound"))
                })?;
                match &entry.value {
                    ParameterValue::Value(value) => Ok(Some(value.clone())),
                    ParameterValue::Null => Ok(None),
                    ParameterValue::ReferenceColumnPosition(_)
                    | ParameterValue::ReferenceColumnName(_) => Err(Error::ValueEvaluation(
                        format!("parameter :{name} is an unexpanded load reference"),
                    )),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub(crate) fn matches(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CompareOp::Eq, Some(Ordering::Equal)) => true,
            (CompareOp::Ne, Some(Ordering::Less | Ordering::Greater)) => true,
            (CompareOp::Lt, Some(Ordering::Less)) => true,
            (CompareOp::Le, Some(Ordering::Less | Ordering::Equal)) => true,
            (CompareOp::Gt, Some(Ordering::Greater)) => true,
            (CompareOp::Ge, Some(Ordering::Greater | Ordering::Equal)) => true,
            _ => false,
        }
    }
}

/// `column <op> scalar`; the only WHERE shape the subset accepts.
#[derive(Debug, Clone)]
pub(crate) struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub value: ScalarExpr,
}

#[derive(Debug, Clone)]
pub(crate) enum Projection {
    Column(String),
    CountStar,
}

#[derive(Debug, Clone)]
pub(crate) struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// One parsed statement.
#[derive(Debug, Clone)]
pub(crate) enum StatementIr {
    CreateTable {
        table: TableDef,
        primary_key: Vec<String>,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
    },
    DropTable {
        name: String,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<ScalarExpr>>,
    },
    Select {
        table: String,
        projections: Vec<Projection>,
        filter: Option<Filter>,
        order_by: Option<OrderBy>,
    },
    Update {
        table: String,
        assignments: Vec<(String, ScalarExpr)>,
        filter: Option<Filter>,
    },
    Delete {
        table: String,
        filter: Option<Filter>,
    },
}

impl StatementIr {
    /// Rough cost hint for the plan mirror. Point operations are cheap;
    /// anything that scans gets a higher level.
    pub(crate) fn work_level(&self) -> u32 {
        match self {
            StatementIr::CreateTable { .. }
            | StatementIr::CreateIndex { .. }
            | StatementIr::DropTable { .. } => 0,
            StatementIr::Insert { .. } => 1,
            StatementIr::Select { filter, .. } => match filter {
                Some(filter) if filter.op == CompareOp::Eq => 1,
                _ => 3,
            },
            StatementIr::Update { .. } | StatementIr::Delete { .. } => 3,
        }
    }
}
