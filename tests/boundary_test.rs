//! Boundary Tests for csvbook
//!
//! This module covers empty inputs, configured limits and sheet naming edge cases.

use calamine::{Data, Reader, Xlsx};
use csvbook::{
    CsvBookError, ErrorKind, SourceRecord, Staging, WorkbookBuilder, WorkbookLimits,
    MAX_SHEET_NAME_LEN,
};
use std::io::Cursor;

fn source(name: &str, content: String) -> SourceRecord<Cursor<Vec<u8>>> {
    SourceRecord::new(name, Cursor::new(content.into_bytes()))
}

fn open(bytes: Vec<u8>) -> Xlsx<Cursor<Vec<u8>>> {
    Xlsx::new(Cursor::new(bytes)).unwrap()
}

/// ソースがない場合もシートを持たない有効なワークブックになる
#[test]
fn test_no_sources_produces_empty_workbook() {
    for staging in [Staging::Memory, Staging::TempFile] {
        let workbook = WorkbookBuilder::new()
            .with_staging(staging)
            .build_workbook(Vec::<SourceRecord<&[u8]>>::new())
            .unwrap();

        assert!(workbook.sheets().is_empty());
        assert!(!workbook.is_empty());

        let xlsx = open(workbook.into_bytes().unwrap());
        assert!(xlsx.sheet_names().is_empty());
    }
}

/// 空のCSVは空のワークシートになる
#[test]
fn test_empty_csv_produces_empty_sheet() {
    let workbook = WorkbookBuilder::new()
        .build_workbook(vec![source("empty.csv", String::new())])
        .unwrap();

    let entry = &workbook.sheets()[0];
    assert_eq!(entry.name, "empty");
    assert_eq!(entry.rows, 0);
    assert_eq!(entry.columns, 0);

    let mut xlsx = open(workbook.into_bytes().unwrap());
    let range = xlsx.worksheet_range("empty").unwrap();
    assert!(range.is_empty());
}

/// 拡張子のみのファイル名は"Sheet"になる
#[test]
fn test_extension_only_name_falls_back_to_sheet() {
    let workbook = WorkbookBuilder::new()
        .build_workbook(vec![
            source(".csv", "a\n".to_string()),
            source(".CSV", "b\n".to_string()),
        ])
        .unwrap();

    let names: Vec<&str> = workbook.sheets().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Sheet", "Sheet_1"]);
}

/// 31文字を超える名前は切り詰められ、衝突時も31文字に収まる
#[test]
fn test_long_names_are_truncated_with_suffix() {
    let long = format!("{}.csv", "x".repeat(40));
    let workbook = WorkbookBuilder::new()
        .build_workbook(vec![
            source(&long, "1\n".to_string()),
            source(&long, "2\n".to_string()),
            source(&long, "3\n".to_string()),
        ])
        .unwrap();

    let names: Vec<String> = workbook.sheets().iter().map(|s| s.name.clone()).collect();
    assert_eq!(names[0], "x".repeat(MAX_SHEET_NAME_LEN));
    assert_eq!(names[1], format!("{}_1", "x".repeat(29)));
    assert_eq!(names[2], format!("{}_2", "x".repeat(29)));
    assert!(names.iter().all(|n| n.chars().count() <= MAX_SHEET_NAME_LEN));

    let xlsx = open(workbook.into_bytes().unwrap());
    assert_eq!(xlsx.sheet_names(), names);
}

/// 使用不可文字は置換され、衝突は大文字小文字を区別せずに検出される
#[test]
fn test_invalid_characters_and_case_insensitive_collisions() {
    let workbook = WorkbookBuilder::new()
        .build_workbook(vec![
            source("a/b.csv", "1\n".to_string()),
            source("a\\b.csv", "2\n".to_string()),
            source("A_B.csv", "3\n".to_string()),
            source("q?[1]*:.csv", "4\n".to_string()),
        ])
        .unwrap();

    let names: Vec<&str> = workbook.sheets().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a_b", "a_b_1", "A_B_2", "q__1___"]);
}

/// 行数の上限を超えるとLimitExceeded
#[test]
fn test_row_limit_exceeded() {
    let result = WorkbookBuilder::new()
        .with_limits(WorkbookLimits {
            max_rows: 2,
            ..WorkbookLimits::default()
        })
        .build_workbook(vec![source("big.csv", "1\n2\n3\n".to_string())]);

    match result {
        Err(CsvBookError::LimitExceeded { sheet, message }) => {
            assert_eq!(sheet, "big");
            assert!(message.contains("row 3"));
        }
        other => panic!("expected LimitExceeded, got {:?}", other.map(|w| w.len())),
    }
}

/// 上限ちょうどの行数は許可される
#[test]
fn test_row_limit_exact() {
    let workbook = WorkbookBuilder::new()
        .with_limits(WorkbookLimits {
            max_rows: 3,
            ..WorkbookLimits::default()
        })
        .build_workbook(vec![source("ok.csv", "1\n2\n3\n".to_string())])
        .unwrap();
    assert_eq!(workbook.sheets()[0].rows, 3);
}

/// 列数の上限を超えるとLimitExceeded
#[test]
fn test_column_limit_exceeded() {
    let result = WorkbookBuilder::new()
        .with_limits(WorkbookLimits {
            max_columns: 3,
            ..WorkbookLimits::default()
        })
        .build_workbook(vec![source("wide.csv", "a,b,c\n1,2,3,4\n".to_string())]);

    let err = result.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(matches!(err, CsvBookError::LimitExceeded { .. }));
}

/// セルの文字数の上限を超える値は切り詰められる
#[test]
fn test_cell_text_is_truncated() {
    let workbook = WorkbookBuilder::new()
        .with_limits(WorkbookLimits {
            max_cell_chars: 5,
            ..WorkbookLimits::default()
        })
        .build_workbook(vec![source("t.csv", "abcdefgh,ok\n".to_string())])
        .unwrap();

    let mut xlsx = open(workbook.into_bytes().unwrap());
    let range = xlsx.worksheet_range("t").unwrap();
    assert_eq!(range.get((0, 0)), Some(&Data::String("abcde".to_string())));
    assert_eq!(range.get((0, 1)), Some(&Data::String("ok".to_string())));
}

/// 無効な設定はbuild()で拒否される
#[test]
fn test_invalid_configuration_is_rejected() {
    for delimiter in [b'"', b'\n', b'\r', 0xE2] {
        let result = WorkbookBuilder::new().with_delimiter(delimiter).build();
        assert!(matches!(result, Err(CsvBookError::Config(_))));
    }

    let result = WorkbookBuilder::new()
        .with_limits(WorkbookLimits {
            max_rows: 0,
            ..WorkbookLimits::default()
        })
        .build();
    assert!(matches!(result, Err(CsvBookError::Config(_))));

    let result = WorkbookBuilder::new()
        .with_limits(WorkbookLimits {
            max_columns: 16_385,
            ..WorkbookLimits::default()
        })
        .build();
    assert!(matches!(result, Err(CsvBookError::Config(_))));
}

/// 制御文字を含むセルもワークブックとして読み込める
#[test]
fn test_control_characters_round_trip() {
    let workbook = WorkbookBuilder::new()
        .build_workbook(vec![source("ctl.csv", "a\u{1}b,  padded  \n".to_string())])
        .unwrap();

    let mut xlsx = open(workbook.into_bytes().unwrap());
    let range = xlsx.worksheet_range("ctl").unwrap();
    assert_eq!(range.get((0, 1)), Some(&Data::String("  padded  ".to_string())));
    assert!(range.get((0, 0)).is_some());
}

/// 多数のソースでもシートの順序が保たれる
#[test]
fn test_many_sources_keep_order() {
    let sources: Vec<_> = (0..120)
        .map(|i| source(&format!("part{:03}.csv", i), format!("{}\n", i)))
        .collect();
    let workbook = WorkbookBuilder::new().build_workbook(sources).unwrap();

    assert_eq!(workbook.sheets().len(), 120);
    for (i, entry) in workbook.sheets().iter().enumerate() {
        assert_eq!(entry.sheet_id, i as u32 + 1);
        assert_eq!(entry.name, format!("part{:03}", i));
    }
}
