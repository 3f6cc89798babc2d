//! Tables stored as a set of B+Tree indexes, and scans over them.
//!
//! - [`definition`]: keys, orders and the indexes derived from them
//! - [`record`]: fixed-width slot encoding of index entries
//! - [`MultiIndexTable`]: keeps every index consistent on insert/update/delete
//! - [`Scan`]: positioned cursor over one index

pub mod definition;
mod multi_index;
pub mod record;
mod row_hooks;
mod scan;

pub use definition::{IndexDefinition, SlotSource, TableDefinition};
pub use multi_index::{MultiIndexTable, StoredRow, TableIndex, ROW_ID_COLUMN};
pub use record::Record;
pub use row_hooks::{KeySlot, RowIndexHooks};
pub use scan::{Scan, ScanDirection};
