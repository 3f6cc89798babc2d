//! Value model: scalar types, values, rows, lists and orderings.
//!
//! This is the narrow slice of a type system the storage and execution core
//! needs: values it can compare, copy, and lay out physically.

mod data_type;
mod list;
mod order;
mod row;
mod value;

pub use data_type::{DataType, ScalarKind};
pub use list::List;
pub use order::{CompareFn, Order, OrderColumn};
pub use row::{Cell, Column, Row, RowType};
pub use value::Value;
