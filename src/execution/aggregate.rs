//! Grouping and aggregation.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::execution::context::ExecutionContext;
use crate::execution::cursor::{Capabilities, Cursor, CursorOps};
use crate::execution::materialize::{delegate_to_materialized, drain, Materialized};
use crate::table::{MultiIndexTable, TableDefinition};
use crate::types::{Column, DataType, Order, Row, RowType, ScalarKind, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        })
    }
}

/// One output column computed over each group.
///
/// Nil inputs are skipped. `Count` without a column counts rows; every
/// other aggregate of a group with no values is nil.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub column: Option<String>,
    pub name: String,
}

impl Aggregate {
    /// Number of rows.
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            function: AggregateFunction::Count,
            column: None,
            name: name.into(),
        }
    }

    /// Number of non-nil values of `column`.
    pub fn count_of(column: impl Into<String>, name: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Count, column, name)
    }

    pub fn sum(column: impl Into<String>, name: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Sum, column, name)
    }

    pub fn min(column: impl Into<String>, name: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Min, column, name)
    }

    pub fn max(column: impl Into<String>, name: impl Into<String>) -> Self {
        Self::over(AggregateFunction::Max, column, name)
    }

    fn over(function: AggregateFunction, column: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            function,
            column: Some(column.into()),
            name: name.into(),
        }
    }

    fn output_type(&self, source: &RowType) -> Result<DataType> {
        let input = match &self.column {
            Some(column) => Some(&source.column(source.require(column)?).data_type),
            None => None,
        };
        match (self.function, input) {
            (AggregateFunction::Count, _) => Ok(DataType::integer()),
            (AggregateFunction::Sum, Some(data_type)) if data_type.kind() == ScalarKind::Integer => {
                Ok(data_type.clone())
            }
            (AggregateFunction::Min | AggregateFunction::Max, Some(data_type)) => Ok(data_type.clone()),
            (function, Some(data_type)) => Err(Error::TypeMismatch(format!(
                "{function} over {} column {}",
                data_type,
                self.column.as_deref().unwrap_or_default()
            ))),
            (function, None) => Err(Error::InvalidDefinition(format!(
                "{function} requires a column"
            ))),
        }
    }

    /// Fold `input` into the running value `acc`.
    fn accumulate(&self, acc: Option<&Value>, input: Option<&Value>, first: bool) -> Result<Option<Value>> {
        let acc = if first { None } else { acc };
        if self.function == AggregateFunction::Count {
            let seen = acc.and_then(Value::as_integer).unwrap_or(0);
            let counts = self.column.is_none() || input.is_some();
            return Ok(Some(Value::Integer(if counts { seen + 1 } else { seen })));
        }
        let Some(input) = input else {
            return Ok(acc.cloned());
        };
        let Some(acc) = acc else {
            return Ok(Some(input.clone()));
        };
        let folded = match self.function {
            AggregateFunction::Sum => {
                let (a, b) = match (acc, input) {
                    (Value::Integer(a), Value::Integer(b)) => (*a, *b),
                    _ => return Err(Error::TypeMismatch(format!("sum of {acc} and {input}"))),
                };
                Value::Integer(a.checked_add(b).ok_or(Error::ArithmeticOverflow)?)
            }
            AggregateFunction::Min if input.compare(acc)? == Ordering::Less => input.clone(),
            AggregateFunction::Max if input.compare(acc)? == Ordering::Greater => input.clone(),
            _ => acc.clone(),
        };
        Ok(Some(folded))
    }
}

/// Group columns and aggregates, with the output row type they produce.
struct Grouping {
    group_by: Vec<String>,
    aggregates: Vec<Aggregate>,
    row_type: Arc<RowType>,
}

impl Grouping {
    fn definition(&self) -> TableDefinition {
        let definition = TableDefinition::new("aggregate", Arc::clone(&self.row_type));
        if self.group_by.is_empty() {
            definition
        } else {
            definition.with_key(Order::ascending(&self.group_by))
        }
    }

    /// Fold `input` into `group`, which is fresh when `first`.
    fn fold(&self, group: &mut Row, input: &Row, first: bool) -> Result<()> {
        let offset = self.group_by.len();
        for (i, aggregate) in self.aggregates.iter().enumerate() {
            let value = match &aggregate.column {
                Some(column) => input.value(column)?,
                None => None,
            };
            let folded = aggregate.accumulate(group.get(offset + i), value, first)?;
            group.set(offset + i, folded);
        }
        Ok(())
    }

    fn fill(&self, ctx: &ExecutionContext, source: &mut Cursor, table: &MultiIndexTable) -> Result<()> {
        if self.group_by.is_empty() {
            let mut total = Row::new(Arc::clone(&self.row_type));
            let mut first = true;
            drain(ctx, source, |row| {
                self.fold(&mut total, &row, first)?;
                first = false;
                Ok(())
            })?;
            if first {
                for (i, aggregate) in self.aggregates.iter().enumerate() {
                    if aggregate.function == AggregateFunction::Count {
                        total.set(i, Some(Value::Integer(0)));
                    }
                }
            }
            return table.insert(&total);
        }

        drain(ctx, source, |row| {
            let key = row.project(Arc::clone(&self.row_type));
            match table.find_row(&key)? {
                Some(existing) => {
                    let mut group = existing.clone();
                    self.fold(&mut group, &row, false)?;
                    table.update(&existing, &group)
                }
                None => {
                    let mut group = key;
                    self.fold(&mut group, &row, true)?;
                    table.insert(&group)
                }
            }
        })
        .map(|_| ())
    }
}

/// One row per distinct value of the group columns, or exactly one row when
/// there are none, ordered on the group columns.
pub struct AggregateCursor {
    ctx: ExecutionContext,
    source: Box<Cursor>,
    grouping: Grouping,
    rows: Option<Materialized>,
}

impl AggregateCursor {
    /// # Errors
    /// Returns `Error::ColumnNotFound` for an unknown column,
    /// `Error::TypeMismatch` for a sum over a non-integer column and
    /// `Error::InvalidDefinition` for clashing output names.
    pub fn new<S: AsRef<str>>(
        ctx: ExecutionContext,
        source: Cursor,
        group_by: &[S],
        aggregates: Vec<Aggregate>,
    ) -> Result<Self> {
        let groups = source.row_type().project(group_by)?;
        let outputs = aggregates
            .iter()
            .map(|aggregate| {
                aggregate
                    .output_type(source.row_type())
                    .map(|data_type| Column::new(aggregate.name.clone(), data_type))
            })
            .collect::<Result<Vec<_>>>()?;
        let row_type = Arc::new(groups.concat(&RowType::new(outputs))?);
        Ok(Self {
            ctx,
            source: Box::new(source),
            grouping: Grouping {
                group_by: group_by.iter().map(|s| s.as_ref().to_string()).collect(),
                aggregates,
                row_type,
            },
            rows: None,
        })
    }

    fn materialize(&mut self) -> Result<Materialized> {
        let (ctx, source, grouping) = (&self.ctx, &mut *self.source, &self.grouping);
        Materialized::build(ctx, grouping.definition(), None, |table| {
            grouping.fill(ctx, source, table)
        })
    }
}

impl CursorOps for AggregateCursor {
    fn row_type(&self) -> &Arc<RowType> {
        &self.grouping.row_type
    }

    fn capabilities(&self) -> Capabilities {
        let caps = Capabilities::all().without(Capabilities::UPDATEABLE | Capabilities::TRUNCATEABLE);
        if self.grouping.group_by.is_empty() {
            caps.without(Capabilities::SEARCHABLE)
        } else {
            caps
        }
    }

    fn order(&self) -> Option<Order> {
        let group_by = &self.grouping.group_by;
        (!group_by.is_empty()).then(|| Order::ascending(group_by))
    }

    fn is_active(&self) -> bool {
        self.rows.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.rows.is_some() {
            return Ok(());
        }
        self.source.open()?;
        match self.materialize() {
            Ok(rows) => {
                self.rows = Some(rows);
                Ok(())
            }
            Err(err) => {
                if let Err(close_err) = self.source.close() {
                    tracing::warn!(error = %close_err, "failed to close aggregate source");
                }
                Err(err)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(rows) = self.rows.take() {
            rows.release();
        }
        self.source.close()
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(rows) = self.rows.take() {
            rows.release();
        }
        self.source.reset()?;
        self.rows = Some(self.materialize()?);
        Ok(())
    }

    delegate_to_materialized!(rows);
}
