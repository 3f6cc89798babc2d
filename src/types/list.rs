//! Homogeneous lists of scalar values.

use crate::types::data_type::DataType;
use crate::types::row::Cell;
use crate::types::value::Value;

/// A list of optional values sharing one element type.
#[derive(Debug, Clone)]
pub struct List {
    element_type: DataType,
    elements: Vec<Option<Cell>>,
    values_owned: bool,
    expanded_streams: bool,
}

impl List {
    pub fn new(element_type: DataType) -> Self {
        Self {
            element_type,
            elements: Vec::new(),
            values_owned: true,
            expanded_streams: true,
        }
    }

    #[inline]
    pub fn element_type(&self) -> &DataType {
        &self.element_type
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn push(&mut self, value: Option<Value>) {
        self.elements.push(value.map(Cell::new));
    }

    pub fn push_cell(&mut self, cell: Option<Cell>) {
        self.elements.push(cell);
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)?.as_ref().map(|c| &c.value)
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.elements.get(index)?.as_ref()
    }

    pub fn cells(&self) -> &[Option<Cell>] {
        &self.elements
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
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.element_type == other.element_type && self.elements == other.elements
    }
}

impl Eq for List {}
