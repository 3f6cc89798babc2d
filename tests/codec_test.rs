//! Physical formats decode to what was encoded.

use std::sync::Arc;

use proptest::prelude::*;
use relcore::codec::{decode_row, decode_table, encode_row, encode_table, RowWriter};
use relcore::types::{DataType, Row, RowType, Value};

fn row_type() -> Arc<RowType> {
    Arc::new(RowType::of([
        ("id", DataType::integer()),
        ("name", DataType::text()),
        ("flag", DataType::boolean()),
        ("blob", DataType::binary()),
    ]))
}

fn row_values() -> impl Strategy<Value = Vec<Option<Value>>> {
    (
        prop::option::of(any::<i64>().prop_map(Value::Integer)),
        prop::option::of("[a-z]{0,12}".prop_map(Value::Text)),
        prop::option::of(any::<bool>().prop_map(Value::Boolean)),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Binary)),
    )
        .prop_map(|(a, b, c, d)| vec![a, b, c, d])
}

proptest! {
    #[test]
    fn prop_table_format_round_trips(rows in prop::collection::vec(row_values(), 0..20)) {
        let row_type = row_type();
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|values| Row::from_values(row_type.clone(), values).unwrap())
            .collect();
        let bytes = encode_table(Some(rows.as_slice())).unwrap();
        let decoded = decode_table(&row_type, &bytes).unwrap().unwrap();
        prop_assert_eq!(decoded, rows);
    }

    #[test]
    fn prop_physical_size_matches_encoding(values in row_values()) {
        let row = Row::from_values(row_type(), values).unwrap();
        let bytes = encode_row(Some(&row)).unwrap();
        let mut writer = RowWriter::new(Some(&row));
        prop_assert_eq!(writer.physical_size().unwrap(), bytes.len());

        let mut buf = vec![0u8; bytes.len()];
        prop_assert_eq!(writer.write_to_physical(&mut buf).unwrap(), bytes.len());
        prop_assert_eq!(&buf, &bytes);

        let (decoded, consumed) = decode_row(&row_type(), &bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded, Some(row));
    }
}
