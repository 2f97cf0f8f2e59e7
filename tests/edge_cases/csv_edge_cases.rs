//! Edge cases in CSV content and naming

use crate::common::TestFixture;
use subir::tag::{EntitySelection, Unattended};
use subir::upload::get_table_structure;
use subir::{ColumnType, EntityType, SubirError, TagRequest, Tagger, UploadOptions, Uploader};

fn notes_fixture() -> TestFixture {
    let fixture = TestFixture::new().unwrap();
    fixture
        .execute("create table sales.notes (id bigint, body varchar);")
        .unwrap();
    fixture
}

fn upload_notes(fixture: &TestFixture, csv: &str) -> subir::Result<usize> {
    let mut uploader = Uploader::new(fixture.warehouse().unwrap());
    uploader.upload("sales", "notes", &[], csv.as_bytes(), &UploadOptions::default())
}

#[test]
fn test_quoted_commas_and_newlines() {
    let fixture = notes_fixture();
    upload_notes(&fixture, "id,body\n1,\"one, two\"\n2,\"line\nbreak\"\n3,\"say \"\"hi\"\"\"\n").unwrap();
    let rows = fixture.query("select body from sales.notes order by id").unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Some("one, two".to_string())],
            vec![Some("line\nbreak".to_string())],
            vec![Some("say \"hi\"".to_string())],
        ]
    );
}

#[test]
fn test_header_only_csv_uploads_nothing() {
    let fixture = notes_fixture();
    assert_eq!(upload_notes(&fixture, "id,body\n").unwrap(), 0);
    assert_eq!(fixture.count("sales.notes").unwrap(), 0);
}

#[test]
fn test_ragged_row_is_csv_error() {
    let fixture = notes_fixture();
    let result = upload_notes(&fixture, "id,body\n1,a,extra\n");
    assert!(matches!(result, Err(SubirError::Csv(_))));
}

#[test]
fn test_headers_matched_after_sanitizing() {
    let fixture = notes_fixture();
    upload_notes(&fixture, "Body,ID,body\nfirst,1,second\n").unwrap();
    let rows = fixture.query("select id, body from sales.notes").unwrap();
    assert_eq!(rows, vec![vec![Some("1".to_string()), Some("first".to_string())]]);
}

#[test]
fn test_unicode_headers_are_sanitized() {
    let structure = get_table_structure("Größe (cm),Prix €\n12,3.5\n".as_bytes()).unwrap();
    assert_eq!(
        structure.into_iter().collect::<Vec<_>>(),
        vec![
            ("gr__e _cm_".to_string(), ColumnType::Integer),
            ("prix _".to_string(), ColumnType::Decimal),
        ]
    );
}

#[test]
fn test_invalid_schema_name_rejected_before_connecting() {
    let fixture = notes_fixture();
    let mut uploader = Uploader::new(fixture.warehouse().unwrap());
    let result = uploader.upload(
        "sales; drop table x",
        "notes",
        &[],
        "id\n1\n".as_bytes(),
        &UploadOptions::default(),
    );
    assert!(matches!(result, Err(SubirError::InvalidName { .. })));
}

#[test]
fn test_whitespace_tags_in_file_are_purged_but_stored_ones_are_not() {
    let fixture = TestFixture::new().unwrap();
    fixture.create_tag_table(EntityType::Ad).unwrap();
    fixture
        .execute("insert into sales.tag_ads values ('acme', 'game', 'fb', '1', ' ', ' ', 'seed.csv');")
        .unwrap();

    let request = TagRequest {
        schema: "sales".to_string(),
        entity: EntitySelection::Explicit(EntityType::Ad),
        replace: false,
        purge: true,
        file_name: "blank.csv".to_string(),
    };
    let csv = "channel,ad_id,ad_tag,ad_subtag\nfb,2,   ,\t\nfb,3,kept,\n";
    let mut tagger = Tagger::new(fixture.warehouse().unwrap(), &fixture.output_dir);
    let applied = tagger.apply_tags(&request, csv.as_bytes(), &mut Unattended).unwrap();
    drop(tagger);

    assert_eq!(applied, 2);
    let ids = fixture
        .query("select ad_id from sales.tag_ads order by ad_id")
        .unwrap();
    assert_eq!(
        ids,
        vec![vec![Some("1".to_string())], vec![Some("3".to_string())]]
    );
}
