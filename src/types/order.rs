//! Orderings over named columns.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::common::Result;
use crate::types::row::Row;
use crate::types::value::Value;

/// Externally supplied comparison for one column.
pub type CompareFn = Arc<dyn Fn(&Value, &Value) -> Result<Ordering> + Send + Sync>;

/// One column of an [`Order`].
#[derive(Clone)]
pub struct OrderColumn {
    pub column: String,
    pub ascending: bool,
    /// Whether nil sorts before every value.
    pub nulls_first: bool,
    comparer: Option<CompareFn>,
}

impl OrderColumn {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
            nulls_first: true,
            comparer: None,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            ascending: false,
            ..Self::asc(column)
        }
    }

    pub fn with_nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = nulls_first;
        self
    }

    pub fn with_comparer(mut self, comparer: CompareFn) -> Self {
        self.comparer = Some(comparer);
        self
    }

    /// Same column and direction, ignoring the comparer.
    pub fn equivalent(&self, other: &OrderColumn) -> bool {
        self.column == other.column && self.ascending == other.ascending
    }

    /// Compare two optional values under this column's policy.
    ///
    /// Nil equals nil. Nil against a value sorts first when `nulls_first`,
    /// last otherwise, regardless of direction. Two values go through the
    /// comparer (or [`Value::compare`]) and are reversed when descending.
    pub fn compare(&self, a: Option<&Value>, b: Option<&Value>) -> Result<Ordering> {
        match (a, b) {
            (None, None) => Ok(Ordering::Equal),
            (None, Some(_)) => Ok(if self.nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }),
            (Some(_), None) => Ok(if self.nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }),
            (Some(a), Some(b)) => {
                let ord = match &self.comparer {
                    Some(compare) => compare(a, b)?,
                    None => a.compare(b)?,
                };
                Ok(if self.ascending { ord } else { ord.reverse() })
            }
        }
    }
}

impl fmt::Debug for OrderColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderColumn")
            .field("column", &self.column)
            .field("ascending", &self.ascending)
            .field("nulls_first", &self.nulls_first)
            .field("comparer", &self.comparer.is_some())
            .finish()
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, Default)]
pub struct Order {
    columns: Vec<OrderColumn>,
}

impl Order {
    pub fn new(columns: Vec<OrderColumn>) -> Self {
        Self { columns }
    }

    /// Ascending order over the named columns.
    pub fn ascending<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().map(|n| OrderColumn::asc(n.as_ref())).collect())
    }

    #[inline]
    pub fn columns(&self) -> &[OrderColumn] {
        &self.columns
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.column.as_str())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.column == column)
    }

    /// The same columns with every direction flipped.
    pub fn reversed(&self) -> Order {
        Order::new(
            self.columns
                .iter()
                .map(|c| OrderColumn {
                    ascending: !c.ascending,
                    nulls_first: !c.nulls_first,
                    ..c.clone()
                })
                .collect(),
        )
    }

    /// Whether `self` begins with `prefix`, column for column.
    pub fn starts_with(&self, prefix: &Order) -> bool {
        prefix.len() <= self.len()
            && prefix
                .columns
                .iter()
                .zip(&self.columns)
                .all(|(a, b)| a.equivalent(b))
    }

    /// Compare two rows on the first `count` columns of this order.
    ///
    /// Both rows are looked up by column name.
    pub fn compare_rows_prefix(&self, a: &Row, b: &Row, count: usize) -> Result<Ordering> {
        for column in self.columns.iter().take(count) {
            let left = a.value(&column.column)?;
            let right = b.value(&column.column)?;
            let ord = column.compare(left, right)?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Compare two rows on every column of this order.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Result<Ordering> {
        self.compare_rows_prefix(a, b, self.len())
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.starts_with(other)
    }
}
