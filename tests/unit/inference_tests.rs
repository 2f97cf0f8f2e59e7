//! Type inference through the public upload API

use crate::common::TestFixture;
use std::fs::File;
use subir::upload::{get_table_structure, render_column_types};
use subir::{ColumnType, DuckDbWarehouse, Uploader};

#[test]
fn test_structure_of_csv_file() {
    let fixture = TestFixture::new().unwrap();
    let long_text = "x".repeat(3000);
    let medium_text = "y".repeat(100);
    let content = format!(
        "Campaign ID,Spend,Start,Notes,Summary,Active,Empty\n\
1,\"1,024.50\",03/15/2024,{},short,TRUE,\n\
2,12,3/16/24,short,{},false,\n",
        long_text, medium_text
    );
    let path = fixture.create_csv_raw("campaigns.csv", &content).unwrap();

    let structure = get_table_structure(File::open(path).unwrap()).unwrap();
    assert_eq!(
        structure.into_iter().collect::<Vec<_>>(),
        vec![
            ("campaign id".to_string(), ColumnType::Integer),
            ("spend".to_string(), ColumnType::Decimal),
            ("start".to_string(), ColumnType::Date),
            ("notes".to_string(), ColumnType::LongText),
            ("summary".to_string(), ColumnType::MediumText),
            ("active".to_string(), ColumnType::Boolean),
            ("empty".to_string(), ColumnType::ShortText),
        ]
    );
}

#[test]
fn test_created_table_reports_its_types() {
    let fixture = TestFixture::new().unwrap();
    let csv = "id,amount,day,paid,label\n1,2.5,2024-05-01,true,a\n";
    let column_types = render_column_types(&get_table_structure(csv.as_bytes()).unwrap());

    let mut uploader = Uploader::new(fixture.warehouse().unwrap());
    let query = uploader
        .create_table_query("sales", "typed", &column_types, &[])
        .unwrap();
    uploader.run_query(&query).unwrap();

    let reported = uploader.get_column_types("sales", "typed").unwrap();
    assert_eq!(reported["id"], ColumnType::Integer);
    assert_eq!(reported["amount"], ColumnType::Decimal);
    assert_eq!(reported["day"], ColumnType::Date);
    assert_eq!(reported["paid"], ColumnType::Boolean);
    // DuckDB drops varchar lengths, so any text column reads back as long text
    assert_eq!(reported["label"], ColumnType::LongText);
}

#[test]
fn test_in_memory_location() {
    let warehouse = DuckDbWarehouse::from_location(":memory:").unwrap();
    assert!(warehouse.location().is_none());
}
