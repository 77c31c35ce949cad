//! Declarative query description, decoupled from backend SQL.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::instance::{AttrMap, Instance};

/// Comparison operators recognized in instance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    Between,
    Is,
    IsNot,
}

impl QueryOp {
    pub fn parse(op: &str) -> Result<Self> {
        match op.trim().to_lowercase().as_str() {
            "=" => Ok(Self::Eq),
            "<>" | "!=" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "like" => Ok(Self::Like),
            "between" => Ok(Self::Between),
            "is" => Ok(Self::Is),
            "is not" => Ok(Self::IsNot),
            other => Err(StoreError::InvalidInput(format!(
                "unknown query operator: {other}"
            ))),
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::Between => "BETWEEN",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        }
    }
}

impl std::fmt::Display for QueryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One aggregate call, keyed in a query by its result alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub func: AggFunc,
    pub args: Vec<String>,
}

impl Aggregate {
    pub fn new(func: AggFunc, args: Vec<String>) -> Self {
        Self { func, args }
    }

    pub fn count_all() -> Self {
        Self::new(AggFunc::Count, vec!["*".to_string()])
    }
}

/// Join tree derived from relationship metadata; the query planner walks it
/// and branches on the relationship kind at each node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinInfo {
    /// Fully qualified relationship name driving this hop.
    pub relationship: String,
    /// Fully qualified entity joined by this hop.
    pub entity: String,
    #[serde(default)]
    pub children: Vec<JoinInfo>,
}

impl JoinInfo {
    pub fn new(relationship: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            relationship: relationship.into(),
            entity: entity.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: JoinInfo) -> Self {
        self.children.push(child);
        self
    }
}

/// Caller-spelled join: an explicit table, lhs column, operator, and an
/// `Entity.column` rhs that must reference the root entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJoinSpec {
    pub table: String,
    pub lhs_column: String,
    pub op: String,
    pub rhs: String,
}

/// One extra predicate attached to a join query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereClause {
    pub column: String,
    pub op: QueryOp,
    pub value: Value,
}

/// Declarative description of a single read.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub query_ops: BTreeMap<String, QueryOp>,
    pub query_vals: AttrMap,
    pub distinct: bool,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub order_desc: bool,
    pub aggregates: BTreeMap<String, Aggregate>,
    /// Projection: result alias → source column reference.
    pub into_spec: BTreeMap<String, String>,
    pub where_clauses: Vec<WhereClause>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QuerySpec {
    /// Lift the query-shaped parts of an instance into a spec.
    pub fn from_instance(inst: &Instance) -> Self {
        Self {
            query_ops: inst.query_ops.clone(),
            query_vals: inst.query_vals.clone(),
            distinct: inst.distinct,
            group_by: inst.group_by.clone(),
            order_by: inst.order_by.clone(),
            order_desc: inst.order_desc,
            aggregates: inst.aggregates.clone(),
            into_spec: BTreeMap::new(),
            where_clauses: Vec::new(),
            limit: inst.limit,
            offset: inst.offset,
        }
    }

    pub fn with_predicate(mut self, attr: impl Into<String>, op: QueryOp, val: Value) -> Self {
        let attr = attr.into();
        self.query_ops.insert(attr.clone(), op);
        self.query_vals.insert(attr, val);
        self
    }

    pub fn has_predicates(&self) -> bool {
        !self.query_ops.is_empty() || !self.where_clauses.is_empty()
    }
}

/// Request shape of the most expressive read path: either a structured
/// `JoinInfo` tree or explicit raw joins, always with a projection.
#[derive(Debug, Clone)]
pub struct JoinQuery {
    pub instance: Instance,
    pub join_info: Option<JoinInfo>,
    pub raw_joins: Vec<RawJoinSpec>,
    pub into_spec: BTreeMap<String, String>,
    pub where_clauses: Vec<WhereClause>,
    pub distinct: bool,
}

impl JoinQuery {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            join_info: None,
            raw_joins: Vec::new(),
            into_spec: BTreeMap::new(),
            where_clauses: Vec::new(),
            distinct: false,
        }
    }

    pub fn with_join_info(mut self, info: JoinInfo) -> Self {
        self.join_info = Some(info);
        self
    }

    pub fn with_raw_join(mut self, spec: RawJoinSpec) -> Self {
        self.raw_joins.push(spec);
        self
    }

    pub fn select(mut self, alias: impl Into<String>, source: impl Into<String>) -> Self {
        self.into_spec.insert(alias.into(), source.into());
        self
    }

    pub fn filter(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}
