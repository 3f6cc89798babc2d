//! Table and index definitions.

use std::fmt;
use std::sync::Arc;

use crate::common::{Error, Result};
use crate::types::{Order, RowType};

/// Where an index slot takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    /// A column of the table's row type.
    Column(usize),
    /// The row's generated identifier, used as a tie-breaker.
    RowId,
}

/// A logical table: columns, unique keys and additional orders.
///
/// The first key clusters the table. A table without keys is clustered on
/// the generated row identifier, so duplicate rows are allowed.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    name: String,
    row_type: Arc<RowType>,
    keys: Vec<Order>,
    orders: Vec<Order>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, row_type: Arc<RowType>) -> Self {
        Self {
            name: name.into(),
            row_type,
            keys: Vec::new(),
            orders: Vec::new(),
        }
    }

    /// Declare a unique key.
    pub fn with_key(mut self, key: Order) -> Self {
        self.keys.push(key);
        self
    }

    /// Declare a (possibly non-unique) order to index.
    pub fn with_order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_type(&self) -> &Arc<RowType> {
        &self.row_type
    }

    pub fn keys(&self) -> &[Order] {
        &self.keys
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Whether the table is clustered on the generated row identifier.
    pub fn is_keyless(&self) -> bool {
        self.keys.is_empty()
    }

    fn columns_of(&self, order: &Order) -> Result<Vec<usize>> {
        if order.is_empty() {
            return Err(Error::InvalidDefinition(format!(
                "empty key or order on {}",
                self.name
            )));
        }
        order.names().map(|name| self.row_type.require(name)).collect()
    }

    fn is_unique(&self, order: &Order) -> bool {
        self.keys
            .iter()
            .any(|key| key.names().all(|column| order.contains(column)))
    }

    /// Derive the clustered index followed by one secondary index per extra
    /// key or order. Orders equivalent to an earlier index are skipped.
    ///
    /// # Errors
    /// Returns `Error::ColumnNotFound` for an unknown column and
    /// `Error::InvalidDefinition` for an empty key or order.
    pub fn derive_indexes(&self) -> Result<Vec<IndexDefinition>> {
        let mut indexes: Vec<IndexDefinition> = Vec::new();

        let (cluster_order, cluster_key) = match self.keys.first() {
            Some(key) => {
                let columns = self.columns_of(key)?;
                (key.clone(), columns.into_iter().map(SlotSource::Column).collect())
            }
            None => (Order::default(), vec![SlotSource::RowId]),
        };
        let mut cluster_data: Vec<SlotSource> = (0..self.row_type.len())
            .filter(|i| !cluster_key.contains(&SlotSource::Column(*i)))
            .map(SlotSource::Column)
            .collect();
        cluster_data.push(SlotSource::RowId);
        indexes.push(IndexDefinition {
            name: format!("{}.clustered", self.name),
            order: cluster_order,
            unique: true,
            clustered: true,
            key: cluster_key.clone(),
            data: cluster_data,
        });

        let secondary = self
            .keys
            .iter()
            .skip(1)
            .map(|key| (key, true))
            .chain(self.orders.iter().map(|order| (order, self.is_unique(order))));
        for (order, unique) in secondary {
            let columns = self.columns_of(order)?;
            if indexes.iter().any(|index| !index.order.is_empty() && index.order == *order) {
                continue;
            }
            let mut key: Vec<SlotSource> = columns.into_iter().map(SlotSource::Column).collect();
            if !unique {
                key.push(SlotSource::RowId);
            }
            indexes.push(IndexDefinition {
                name: format!("{}.{}", self.name, order.names().collect::<Vec<_>>().join("_")),
                order: order.clone(),
                unique,
                clustered: false,
                key,
                data: cluster_key.clone(),
            });
        }
        Ok(indexes)
    }
}

/// One physical index of a table.
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    /// Visible ordering; empty for a keyless clustered index.
    pub order: Order,
    pub unique: bool,
    pub clustered: bool,
    /// Key slots, in order.
    pub key: Vec<SlotSource>,
    /// Data slots, in order.
    pub data: Vec<SlotSource>,
}

impl IndexDefinition {
    /// Whether `column` is stored in this index's key or data.
    pub fn covers(&self, column: usize) -> bool {
        let source = SlotSource::Column(column);
        self.key.contains(&source) || self.data.contains(&source)
    }

    /// Number of key slots that hold visible columns.
    pub fn key_column_count(&self) -> usize {
        self.key
            .iter()
            .filter(|s| matches!(s, SlotSource::Column(_)))
            .count()
    }
}

impl fmt::Display for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}{})",
            self.name,
            if self.clustered { "clustered" } else { "secondary" },
            if self.unique { ", unique" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn employees() -> TableDefinition {
        let row_type = Arc::new(RowType::of([
            ("id", DataType::integer()),
            ("dept", DataType::text()),
            ("name", DataType::text()),
        ]));
        TableDefinition::new("employees", row_type)
            .with_key(Order::ascending(&["id"]))
            .with_order(Order::ascending(&["dept"]))
    }

    #[test]
    fn test_clustered_and_secondary() {
        let indexes = employees().derive_indexes().unwrap();
        assert_eq!(indexes.len(), 2);

        let clustered = &indexes[0];
        assert!(clustered.clustered && clustered.unique);
        assert_eq!(clustered.key, vec![SlotSource::Column(0)]);
        assert_eq!(
            clustered.data,
            vec![SlotSource::Column(1), SlotSource::Column(2), SlotSource::RowId]
        );

        let dept = &indexes[1];
        assert!(!dept.unique);
        assert_eq!(dept.key, vec![SlotSource::Column(1), SlotSource::RowId]);
        assert_eq!(dept.data, vec![SlotSource::Column(0)]);
        assert!(dept.covers(0) && dept.covers(1) && !dept.covers(2));
    }

    #[test]
    fn test_order_containing_key_is_unique() {
        let indexes = employees()
            .with_order(Order::ascending(&["dept", "id"]))
            .derive_indexes()
            .unwrap();
        assert!(indexes[2].unique);
        assert_eq!(indexes[2].key.len(), 2);
    }

    #[test]
    fn test_duplicate_order_is_skipped() {
        let indexes = employees()
            .with_order(Order::ascending(&["dept"]))
            .derive_indexes()
            .unwrap();
        assert_eq!(indexes.len(), 2);
    }

    #[test]
    fn test_keyless_table() {
        let row_type = Arc::new(RowType::of([("n", DataType::integer())]));
        let indexes = TableDefinition::new("heap", row_type).derive_indexes().unwrap();
        assert_eq!(indexes[0].key, vec![SlotSource::RowId]);
        assert_eq!(indexes[0].data, vec![SlotSource::Column(0), SlotSource::RowId]);
    }

    #[test]
    fn test_unknown_column() {
        let row_type = Arc::new(RowType::of([("n", DataType::integer())]));
        let definition = TableDefinition::new("t", row_type).with_key(Order::ascending(&["x"]));
        assert!(matches!(definition.derive_indexes(), Err(Error::ColumnNotFound(_))));
    }
}
