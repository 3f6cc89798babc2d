//! Relational operators behind the cursor protocol.
//!
//! Every operator implements [`CursorOps`] and is wrapped in the [`Cursor`]
//! enum so operators can own each other as sources:
//! - [`TableCursor`] - a table read through one of its indexes
//! - [`RestrictCursor`], [`ProjectCursor`] - streaming row filters
//! - [`OrderCursor`], [`AggregateCursor`], [`UnionCursor`] - materialize into a
//!   temporary table
//! - [`SetFilterCursor`] - difference and intersection
//! - [`ExplodeCursor`] - hierarchy walk
//! - [`join`] - nested loop, merge and searched joins
//!
//! Temporary tables live in the context's stream manager and are released
//! when their operator closes.

pub mod aggregate;
pub mod base;
pub mod context;
pub mod cursor;
pub mod explode;
pub mod join;
pub mod materialize;
pub mod order;
pub mod project;
pub mod restrict;
pub mod set;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregate::{Aggregate, AggregateCursor, AggregateFunction};
pub use base::TableCursor;
pub use context::{CancellationToken, ExecutionContext};
pub use cursor::{
    close_all, count_rows, open_all, select_row, Capabilities, Cursor, CursorOps, CursorState, CursorType, Predicate,
};
pub use explode::{ExplodeCursor, ExplodeDefinition};
pub use join::{JoinDefinition, JoinKind, MergeJoin, NestedLoopJoin, SearchedJoin};
pub use materialize::encode_cursor;
pub use order::OrderCursor;
pub use project::ProjectCursor;
pub use restrict::RestrictCursor;
pub use set::{SetFilterCursor, SetOperation, UnionCursor};
