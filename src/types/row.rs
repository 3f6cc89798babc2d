//! Row types and rows.

use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::storage::StreamManager;
use crate::types::data_type::DataType;
use crate::types::value::Value;

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// An ordered list of named columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RowType {
    columns: Vec<Column>,
}

impl RowType {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Build a row type from `(name, type)` pairs.
    pub fn of<'a>(columns: impl IntoIterator<Item = (&'a str, DataType)>) -> Self {
        Self::new(
            columns
                .into_iter()
                .map(|(name, data_type)| Column::new(name, data_type))
                .collect(),
        )
    }

    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Like [`RowType::index_of`], failing with `ColumnNotFound`.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Row type holding the named columns in the given order.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Result<RowType> {
        let columns = names
            .iter()
            .map(|name| self.require(name.as_ref()).map(|i| self.columns[i].clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(RowType::new(columns))
    }

    /// This row type's columns followed by `other`'s.
    ///
    /// # Errors
    /// Returns `Error::InvalidDefinition` if a column name appears on both
    /// sides.
    pub fn concat(&self, other: &RowType) -> Result<RowType> {
        if let Some(dup) = other.columns.iter().find(|c| self.contains(&c.name)) {
            return Err(Error::InvalidDefinition(format!(
                "column {} appears on both sides",
                dup.name
            )));
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(RowType::new(columns))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A value together with its specialized type, when it has one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    pub value: Value,
    /// Set when the value's type is a specialization of the declared type.
    pub specialized: Option<DataType>,
}

impl Cell {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            specialized: None,
        }
    }

    pub fn specialized(value: Value, data_type: DataType) -> Self {
        Self {
            value,
            specialized: Some(data_type),
        }
    }
}

/// A fixed-arity row of optional values.
///
/// `values_owned` decides whether [`Row::release_streams`] frees the streams
/// referenced by deferred values. `expanded_streams` records whether
/// non-native values are held inline (`Value::Binary`) or as stream
/// references (`Value::Stream`).
#[derive(Debug, Clone)]
pub struct Row {
    row_type: Arc<RowType>,
    cells: Vec<Option<Cell>>,
    values_owned: bool,
    expanded_streams: bool,
}

impl Row {
    /// A row with every column nil.
    pub fn new(row_type: Arc<RowType>) -> Self {
        let cells = vec![None; row_type.len()];
        Self {
            row_type,
            cells,
            values_owned: true,
            expanded_streams: true,
        }
    }

    /// A row with the given values in column order.
    ///
    /// # Errors
    /// Returns `Error::InvalidDefinition` if the arity does not match.
    pub fn from_values(row_type: Arc<RowType>, values: Vec<Option<Value>>) -> Result<Self> {
        if values.len() != row_type.len() {
            return Err(Error::InvalidDefinition(format!(
                "row has {} columns, {} values given",
                row_type.len(),
                values.len()
            )));
        }
        let mut row = Row::new(row_type);
        row.cells = values.into_iter().map(|v| v.map(Cell::new)).collect();
        Ok(row)
    }

    #[inline]
    pub fn row_type(&self) -> &Arc<RowType> {
        &self.row_type
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.cells[index].as_ref().map(|c| &c.value)
    }

    #[inline]
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells[index].as_ref()
    }

    #[inline]
    pub fn has_value(&self, index: usize) -> bool {
        self.cells[index].is_some()
    }

    /// Value of the named column.
    pub fn value(&self, name: &str) -> Result<Option<&Value>> {
        let index = self.row_type.require(name)?;
        Ok(self.get(index))
    }

    pub fn set(&mut self, index: usize, value: Option<Value>) {
        self.cells[index] = value.map(Cell::new);
    }

    pub fn set_cell(&mut self, index: usize, cell: Option<Cell>) {
        self.cells[index] = cell;
    }

    /// Set the named column.
    pub fn set_value(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        let index = self.row_type.require(name)?;
        self.set(index, value);
        Ok(())
    }

    /// Clear every column to nil.
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&Value>> {
        self.cells.iter().map(|c| c.as_ref().map(|c| &c.value))
    }

    #[inline]
    pub fn values_owned(&self) -> bool {
        self.values_owned
    }

    pub fn set_values_owned(&mut self, owned: bool) {
        self.values_owned = owned;
    }

    #[inline]
    pub fn expanded_streams(&self) -> bool {
        self.expanded_streams
    }

    pub fn set_expanded_streams(&mut self, expanded: bool) {
        self.expanded_streams = expanded;
    }

    /// Copy values into `target` by column name.
    ///
    /// Target columns with no counterpart are left untouched; source columns
    /// with no counterpart are ignored.
    pub fn copy_to(&self, target: &mut Row) {
        for (i, column) in self.row_type.columns().iter().enumerate() {
            if let Some(j) = target.row_type.index_of(&column.name) {
                target.cells[j] = self.cells[i].clone();
            }
        }
    }

    /// A new row of `row_type` filled from this row by column name.
    pub fn project(&self, row_type: Arc<RowType>) -> Row {
        let mut row = Row::new(row_type);
        self.copy_to(&mut row);
        row
    }

    /// Replace deferred values with their bytes.
    pub fn expand_streams(&mut self, streams: &dyn StreamManager) -> Result<()> {
        for cell in self.cells.iter_mut().flatten() {
            if let Value::Stream(id) = cell.value {
                cell.value = Value::Binary(streams.read(id)?);
            }
        }
        self.expanded_streams = true;
        Ok(())
    }

    /// Free the streams referenced by deferred values if this row owns them.
    ///
    /// Released columns become nil.
    pub fn release_streams(&mut self, streams: &dyn StreamManager) -> Result<()> {
        if !self.values_owned {
            return Ok(());
        }
        for slot in self.cells.iter_mut() {
            if let Some(Cell {
                value: Value::Stream(id),
                ..
            }) = slot
            {
                streams.deallocate(*id)?;
                *slot = None;
            }
        }
        Ok(())
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.row_type == other.row_type && self.cells == other.cells
    }
}

impl Eq for Row {}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, column) in self.row_type.columns().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match self.get(i) {
                Some(v) => write!(f, "{}: {v}", column.name)?,
                None => write!(f, "{}: nil", column.name)?,
            }
        }
        f.write_str(")")
    }
}
