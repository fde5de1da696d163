use std::fs::File;
use std::io::Write;

use lightctl_config::{RawTable, load_table_csv, parse_table_csv};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn loads_protocol_table_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("protocol.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "Sections,CH1_status,CH1_time_s,CH2_status,CH2_time_ms").unwrap();
    writeln!(f, "1,1,10,0,500").unwrap();
    writeln!(f, "2,0,5,1,500").unwrap();
    writeln!(f, "3,1,10,,").unwrap();
    drop(f);

    let t = load_table_csv(&path).unwrap();
    assert_eq!(t.width(), 5);
    assert_eq!(t.height(), 3);
    let ch2: Vec<Option<&str>> = t.column(3).collect();
    assert_eq!(ch2, vec![Some("0"), Some("1"), None]);
    assert_eq!(t.index_of("CH2_time_ms"), Some(4));
}

#[rstest]
fn missing_file_names_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_table_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("nope.csv"));
}

#[rstest]
#[case("a,b\n1,2,3\n")]
#[case("a,b\n1,2\n4,5,6,7\n")]
fn extra_populated_cells_are_rejected(#[case] csv: &str) {
    let err = parse_table_csv(csv.as_bytes()).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row"));
}

#[rstest]
fn spreadsheet_artifacts_are_removed() {
    let csv = "Sections,CH1_status,CH1_time_s, ,Unnamed: 4\n1,1,10,,\n2,0,5,,\n,,,,\n";
    let t = parse_table_csv(csv.as_bytes()).unwrap();
    assert_eq!(
        t,
        RawTable {
            headers: vec![
                "Sections".to_string(),
                "CH1_status".to_string(),
                "CH1_time_s".to_string()
            ],
            rows: vec![
                vec![Some("1".into()), Some("1".into()), Some("10".into())],
                vec![Some("2".into()), Some("0".into()), Some("5".into())],
            ],
            dropped: vec![String::new(), "Unnamed: 4".to_string()],
        }
    );
}

#[rstest]
fn from_rows_matches_parsed_table() {
    let parsed = parse_table_csv("x,y\n1,\n,2\n".as_bytes()).unwrap();
    let built = RawTable::from_rows(&["x", "y"], &[&["1", ""], &["", "2"]]);
    assert_eq!(parsed, built);
}
