use std::fs;

use file_convert_bot::converters::tabular::{read_table, write_table, Table};
use tempfile::TempDir;

fn fixture_table() -> Table {
    let mut rows = Vec::new();
    for i in 0..100 {
        rows.push(vec![
            i.to_string(),
            format!("value, with comma {i}"),
            format!("\"quoted\" & escaped <{i}>"),
        ]);
    }
    Table {
        columns: vec!["id".to_string(), "text".to_string(), "tricky".to_string()],
        rows,
    }
}

fn round_trip(table: &Table, dir: &TempDir, via: &str) -> Table {
    let path = dir.path().join(format!("table.{via}"));
    write_table(table, &path, via).unwrap();
    read_table(&path, via).unwrap()
}

#[test]
fn csv_to_spreadsheet_round_trip_is_exact() {
    let dir = TempDir::new().unwrap();
    let table = fixture_table();
    let back = round_trip(&table, &dir, "xlsx");
    assert_eq!(back, table);
}

#[test]
fn csv_round_trip_is_exact() {
    let dir = TempDir::new().unwrap();
    let table = fixture_table();
    let back = round_trip(&table, &dir, "csv");
    assert_eq!(back, table);
}

#[test]
fn json_output_preserves_column_order_and_types_numbers() {
    let dir = TempDir::new().unwrap();
    let table = Table {
        columns: vec!["z".to_string(), "a".to_string(), "m".to_string()],
        rows: vec![
            vec!["1".to_string(), "one".to_string(), "1.5".to_string()],
            vec!["2".to_string(), "two".to_string(), "x".to_string()],
        ],
    };

    let path = dir.path().join("table.json");
    write_table(&table, &path, "json").unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    // numeric-looking cells are serialized as numbers
    assert!(raw.contains("\"z\": 1"), "{raw}");
    assert!(raw.contains("\"m\": 1.5"), "{raw}");
    assert!(raw.contains("\"m\": \"x\""), "{raw}");

    let back = read_table(&path, "json").unwrap();
    // column order survives (declaration order, not alphabetical)
    assert_eq!(back.columns, table.columns);
    assert_eq!(back.rows.len(), 2);
    assert_eq!(back.rows[0][0], "1");
    assert_eq!(back.rows[1][1], "two");
}

#[test]
fn empty_sources_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.json");
    fs::write(&path, "[]").unwrap();
    assert!(read_table(&path, "json").is_err());
}
