//! CLI command tests

use crate::common::{assertions, CliTestRunner};
use subir::SubirError;

#[test]
fn test_create_command_writes_and_runs_sql() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let csv = fixture
        .create_csv(
            "Daily Orders.csv",
            &[
                vec!["ID", "Customer Name", "Amount", "Day", "Paid"],
                vec!["1", "Acme", "10.5", "2024-01-02", "true"],
                vec!["2", "Globex", "7", "2024-01-03", "false"],
            ],
        )
        .unwrap();

    runner.expect_success(&["create", csv.to_str().unwrap(), "-s", "sales", "--yes"]);

    let sql_path = fixture.output_dir.join("create_daily_orders.sql");
    assertions::assert_file_exists_and_not_empty(&sql_path);
    let sql = std::fs::read_to_string(&sql_path).unwrap();
    assert!(sql.starts_with("create table sales.daily_orders ("));
    assert!(sql.contains("\"customer name\" character varying(256)"));
    assert!(sql.contains("\"amount\" double precision"));
    assert!(sql.contains("\"day\" date"));
    assert!(sql.contains("\"paid\" boolean"));

    assert!(fixture.table_exists("sales", "daily_orders").unwrap());
    assert_eq!(fixture.count("sales.daily_orders").unwrap(), 0);
}

#[test]
fn test_create_command_with_explicit_table() {
    let runner = CliTestRunner::new().unwrap();
    let csv = runner
        .fixture()
        .create_csv("x.csv", &[vec!["id"], vec!["1"]])
        .unwrap();

    runner.expect_success(&["create", csv.to_str().unwrap(), "-s", "sales", "-t", "things", "-y"]);
    assert!(runner.fixture().table_exists("sales", "things").unwrap());
}

#[test]
fn test_create_command_rejects_invalid_table_name() {
    let runner = CliTestRunner::new().unwrap();
    let csv = runner
        .fixture()
        .create_csv("x.csv", &[vec!["id"], vec!["1"]])
        .unwrap();

    let error = runner.expect_failure(&["create", csv.to_str().unwrap(), "-s", "sales", "-t", "Things", "-y"]);
    assert!(matches!(error, SubirError::InvalidName { name } if name == "Things"));
}

#[test]
fn test_upload_command_merges_by_lowercased_column() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture
        .execute("create table sales.orders (id bigint, name varchar); insert into sales.orders values (1, 'old');")
        .unwrap();
    let csv = fixture
        .create_csv("orders.csv", &[vec!["ID", "Name"], vec!["1", "new"], vec!["2", "added"]])
        .unwrap();

    runner.expect_success(&["upload", csv.to_str().unwrap(), "-s", "sales", "-m", "ID"]);

    let rows = fixture
        .query("select id, name from sales.orders order by id")
        .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Some("1".to_string()), Some("new".to_string())],
            vec![Some("2".to_string()), Some("added".to_string())],
        ]
    );
}

#[test]
fn test_upload_command_drop_replaces_contents() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture
        .execute("create table sales.orders (id bigint); insert into sales.orders values (1), (2), (3);")
        .unwrap();
    let csv = fixture.create_csv("orders.csv", &[vec!["id"], vec!["9"]]).unwrap();

    runner.expect_success(&["upload", csv.to_str().unwrap(), "-s", "sales", "--drop"]);
    assert_eq!(fixture.count("sales.orders").unwrap(), 1);
}

#[test]
fn test_upload_command_to_missing_table() {
    let runner = CliTestRunner::new().unwrap();
    let csv = runner
        .fixture()
        .create_csv("ghost.csv", &[vec!["id"], vec!["1"]])
        .unwrap();

    let error = runner.expect_failure(&["upload", csv.to_str().unwrap(), "-s", "sales"]);
    assert!(matches!(error, SubirError::MissingTable { .. }));
}

#[test]
fn test_tag_command_unattended() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture.create_tag_table(subir::EntityType::Ad).unwrap();
    let csv = fixture
        .create_csv_raw(
            "ad_tags.csv",
            ",company,app,channel,ad_id,ad_tag,ad_subtag\n0,acme,game,fb,\"\"\"11\"\"\",brand,\n1,acme,game,fb,\"\"\"12\"\"\",promo,spring\n",
        )
        .unwrap();

    runner.expect_success(&["tag", csv.to_str().unwrap(), "-s", "sales", "--yes"]);

    let rows = fixture
        .query("select company_identifier, ad_id, ad_tag, ad_subtag, upload_group from sales.tag_ads order by ad_id")
        .unwrap();
    assert_eq!(
        rows[0],
        vec![
            Some("acme".to_string()),
            Some("11".to_string()),
            Some("brand".to_string()),
            None,
            Some("ad_tags.csv".to_string()),
        ]
    );
    assert_eq!(rows[1][3].as_deref(), Some("spring"));
}

#[test]
fn test_unknown_database_is_config_error() {
    let runner = CliTestRunner::new().unwrap();
    let csv = runner
        .fixture()
        .create_csv("x.csv", &[vec!["id"], vec!["1"]])
        .unwrap();

    let error = runner.expect_failure(&["-d", "prod", "upload", csv.to_str().unwrap(), "-s", "sales"]);
    match error {
        SubirError::Config { message } => assert!(message.contains("Available: test")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_invalid_arguments_fail_to_parse() {
    let runner = CliTestRunner::new().unwrap();
    let error = runner.expect_failure(&["upload", "x.csv"]);
    assert!(matches!(error, SubirError::InvalidInput { .. }));
}
