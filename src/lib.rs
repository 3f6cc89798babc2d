//! relcore - B+Tree indexes, multi-index tables and navigable relational cursors.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            relcore                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Operators (execution/)                      │   │
//! │  │  Restrict | Project | Order | Aggregate | Set | Explode  │   │
//! │  │      Joins: nested loop | merge | searched               │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓  CursorOps                       │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Tables (table/)                             │   │
//! │  │      MultiIndexTable (clustered + secondary) + Scan      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Index Layer (index/)                        │   │
//! │  │   B+Tree with mutation events delivered to open scans    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Storage Layer (storage/)                    │   │
//! │  │      StreamManager: memory | file checkpoints            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (StreamId, Error, config)
//! - [`storage`] - Stream allocation and scoped access
//! - [`types`] - Values, rows, row types and orders
//! - [`codec`] - Physical row, list and table formats
//! - [`index`] - B+Tree index
//! - [`table`] - Multi-index tables and scans
//! - [`execution`] - Cursor protocol and relational operators
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use relcore::execution::{CursorOps, ExecutionContext, TableCursor};
//! use relcore::storage::MemoryStreamManager;
//! use relcore::table::{MultiIndexTable, TableDefinition};
//! use relcore::types::{DataType, Order, Row, RowType, Value};
//!
//! let ctx = ExecutionContext::new(Arc::new(MemoryStreamManager::new()));
//! let row_type = Arc::new(RowType::of([("id", DataType::integer())]));
//! let definition = TableDefinition::new("t", row_type.clone()).with_key(Order::ascending(&["id"]));
//! let table = MultiIndexTable::create(ctx.streams().clone(), definition, ctx.config().index).unwrap();
//! table.insert(&Row::from_values(row_type, vec![Some(Value::Integer(1))]).unwrap()).unwrap();
//!
//! let mut cursor = TableCursor::new(Arc::new(table));
//! cursor.open().unwrap();
//! while cursor.next().unwrap() {}
//! ```

// Core modules
pub mod common;
pub mod storage;
pub mod types;

pub mod codec;
pub mod execution;
pub mod index;
pub mod table;

// Re-export commonly used items at crate root for convenience
pub use common::{EngineConfig, Error, IndexConfig, Result, StreamId};

pub use execution::{Cursor, CursorOps, ExecutionContext};
pub use table::{MultiIndexTable, Scan, TableDefinition};
