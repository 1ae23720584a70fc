use isp3a_config::{WindowRow, load_windows_csv};
use std::fs;
use tempfile::tempdir;

#[test]
fn loads_rows_with_exact_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("windows.csv");
    fs::write(
        &path,
        "x_start,y_start,x_end,y_end,weight\n0,0,959,539,5\n960, 0, 1919, 539, 5\n",
    )
    .unwrap();

    let rows = load_windows_csv(&path).expect("load");
    assert_eq!(
        rows,
        vec![
            WindowRow {
                x_start: 0,
                y_start: 0,
                x_end: 959,
                y_end: 539,
                weight: 5
            },
            WindowRow {
                x_start: 960,
                y_start: 0,
                x_end: 1919,
                y_end: 539,
                weight: 5
            },
        ]
    );
}

#[test]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("windows.csv");
    fs::write(&path, "x0,y0,x1,y1,w\n0,0,10,10,1\n").unwrap();

    let err = load_windows_csv(&path).expect_err("must reject");
    assert!(format!("{err}").contains("must have headers"));
}

#[test]
fn reports_bad_row_with_line_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("windows.csv");
    fs::write(
        &path,
        "x_start,y_start,x_end,y_end,weight\n0,0,10,10,1\n0,0,10,ten,1\n",
    )
    .unwrap();

    let err = load_windows_csv(&path).expect_err("must reject");
    assert!(format!("{err}").contains("invalid CSV row 3"));
}

#[test]
fn rejects_more_rows_than_supported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("windows.csv");
    let mut body = String::from("x_start,y_start,x_end,y_end,weight\n");
    for _ in 0..7 {
        body.push_str("0,0,10,10,1\n");
    }
    fs::write(&path, body).unwrap();

    let err = load_windows_csv(&path).expect_err("must reject");
    assert!(format!("{err}").contains("at most 6"));
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = load_windows_csv(&dir.path().join("nope.csv")).expect_err("must fail");
    assert!(format!("{err}").contains("open metering window CSV"));
}
