//! Worksheet Writer
//!
//! CSVを1行ずつ読み込み、ワークシートXMLとして書き出す。
//! すべてのセルはインライン文字列（`t="inlineStr"`）として出力し、数値への型推論は行いません。

use std::io::{Read, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::CsvBookError;
use crate::security::WorkbookLimits;
use crate::types::CellCoord;
use crate::writer::{OFFICE_REL_NS, SPREADSHEETML_NS};

/// UTF-8 BOM
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 書き込んだワークシートの統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SheetStats {
    /// 行数
    pub rows: u32,
    /// 最大フィールド数
    pub columns: u32,
}

/// CSVストリームをワークシートXMLとして書き出す
///
/// # 引数
///
/// * `out` - 出力先（通常はZIPエントリ）
/// * `input` - CSVのバイトストリーム
/// * `delimiter` - 区切り文字
/// * `limits` - 行数・列数・セル文字数の上限
/// * `sheet_name` - エラーメッセージ用のシート名
///
/// # 戻り値
///
/// * `Ok(SheetStats)` - 書き込んだ行数と最大列数
/// * `Err(CsvBookError)` - I/Oエラー、または行数・列数の上限超過
///
/// # 注意
///
/// ヘッダー行の特別扱いはしません。フィールド数の不一致や不正なUTF-8は
/// エラーとせず、その行をベストエフォートで出力します。
pub(crate) fn write_worksheet<W: Write, R: Read>(
    out: W,
    input: R,
    delimiter: u8,
    limits: &WorkbookLimits,
    sheet_name: &str,
) -> Result<SheetStats, CsvBookError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(input);

    let mut writer = Writer::new(out);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

    let mut root = BytesStart::new("worksheet");
    root.push_attribute(("xmlns", SPREADSHEETML_NS));
    root.push_attribute(("xmlns:r", OFFICE_REL_NS));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("sheetData")))?;

    let mut stats = SheetStats::default();
    let mut record = csv::ByteRecord::new();

    while reader.read_byte_record(&mut record)? {
        if stats.rows >= limits.max_rows {
            return Err(CsvBookError::LimitExceeded {
                sheet: sheet_name.to_string(),
                message: format!(
                    "row {} exceeds maximum of {}",
                    stats.rows as u64 + 1,
                    limits.max_rows
                ),
            });
        }
        if record.len() > limits.max_columns as usize {
            return Err(CsvBookError::LimitExceeded {
                sheet: sheet_name.to_string(),
                message: format!(
                    "row {} has {} fields (maximum {})",
                    stats.rows + 1,
                    record.len(),
                    limits.max_columns
                ),
            });
        }

        let row_index = stats.rows;
        let row_number = (row_index + 1).to_string();
        let mut row = BytesStart::new("row");
        row.push_attribute(("r", row_number.as_str()));
        writer.write_event(Event::Start(row))?;

        for (col, field) in record.iter().enumerate() {
            // 先頭行のBOMはセル値に含めない
            let field = if row_index == 0 && col == 0 {
                field.strip_prefix(UTF8_BOM).unwrap_or(field)
            } else {
                field
            };
            let text = String::from_utf8_lossy(field);
            write_inline_cell(
                &mut writer,
                CellCoord::new(row_index, col as u32),
                &text,
                limits.max_cell_chars,
            )?;
        }

        writer.write_event(Event::End(BytesEnd::new("row")))?;

        stats.rows += 1;
        stats.columns = stats.columns.max(record.len() as u32);
    }

    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
    writer.write_event(Event::End(BytesEnd::new("worksheet")))?;

    Ok(stats)
}

/// インライン文字列セルを1つ書き出す
fn write_inline_cell<W: Write>(
    writer: &mut Writer<W>,
    coord: CellCoord,
    value: &str,
    max_chars: usize,
) -> Result<(), CsvBookError> {
    let reference = coord.to_a1_notation();
    let mut cell = BytesStart::new("c");
    cell.push_attribute(("r", reference.as_str()));
    cell.push_attribute(("t", "inlineStr"));
    writer.write_event(Event::Start(cell))?;
    writer.write_event(Event::Start(BytesStart::new("is")))?;

    let encoded = encode_cell_text(value, max_chars);
    let mut text = BytesStart::new("t");
    if needs_space_preserve(&encoded) {
        text.push_attribute(("xml:space", "preserve"));
    }

    if encoded.is_empty() {
        writer.write_event(Event::Empty(text))?;
    } else {
        writer.write_event(Event::Start(text))?;
        writer.write_event(Event::Text(BytesText::new(&encoded)))?;
        writer.write_event(Event::End(BytesEnd::new("t")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("is")))?;
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

/// セル文字列をSpreadsheetML向けにエンコードする
///
/// 1. `max_chars`文字に切り詰め
/// 2. XML 1.0で使用できない文字を`_xHHHH_`形式に置換
/// 3. `_xHHHH_`と解釈されてしまうリテラルの`_`を`_x005F_`に置換
///
/// XMLの特殊文字（`<`、`&`など）のエスケープはquick-xmlが行います。
pub(crate) fn encode_cell_text(value: &str, max_chars: usize) -> String {
    let chars: Vec<char> = value.chars().take(max_chars).collect();
    let mut out = String::with_capacity(chars.len());

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' && looks_like_escape(&chars[i + 1..]) {
            out.push_str("_x005F_");
        } else if is_xml_char(c) {
            out.push(c);
        } else {
            out.push_str(&format!("_x{:04X}_", c as u32));
        }
    }

    out
}

/// `_`に続く文字列が`xHHHH_`の形かどうか
fn looks_like_escape(rest: &[char]) -> bool {
    rest.len() >= 6
        && (rest[0] == 'x' || rest[0] == 'X')
        && rest[1..5].iter().all(|c| c.is_ascii_hexdigit())
        && rest[5] == '_'
}

/// XML 1.0で使用可能な文字かどうか
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// 前後の空白を保持する必要があるかどうか
fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(csv: &str) -> (String, SheetStats) {
        let mut out = Vec::new();
        let stats = write_worksheet(
            &mut out,
            csv.as_bytes(),
            b',',
            &WorkbookLimits::default(),
            "test",
        )
        .unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn test_write_simple_rows() {
        let (xml, stats) = render("a,b\n1,2\n");
        assert_eq!(stats, SheetStats { rows: 2, columns: 2 });
        assert!(xml.contains(r#"<row r="1"><c r="A1" t="inlineStr"><is><t>a</t></is></c>"#));
        assert!(xml.contains(r#"<c r="B2" t="inlineStr"><is><t>2</t></is></c>"#));
        assert!(xml.ends_with("</sheetData></worksheet>"));
    }

    #[test]
    fn test_numbers_stay_text() {
        let (xml, _) = render("007,1e5\n");
        assert!(xml.contains("<t>007</t>"));
        assert!(xml.contains("<t>1e5</t>"));
        assert!(!xml.contains("t=\"n\""));
    }

    #[test]
    fn test_ragged_rows_are_tolerated() {
        let (xml, stats) = render("a,b,c\n1\n2,3,4,5\n");
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.columns, 4);
        assert!(xml.contains(r#"<c r="D3" t="inlineStr">"#));
    }

    #[test]
    fn test_empty_fields_are_written() {
        let (xml, stats) = render("a,,c\n");
        assert_eq!(stats.columns, 3);
        assert!(xml.contains(r#"<c r="B1" t="inlineStr"><is><t/></is></c>"#));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut out = Vec::new();
        let stats = write_worksheet(
            &mut out,
            &b"ok,\xFF\xFE\n"[..],
            b',',
            &WorkbookLimits::default(),
            "test",
        )
        .unwrap();
        assert_eq!(stats.rows, 1);
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains('\u{FFFD}'));
    }

    #[test]
    fn test_bom_is_stripped() {
        let (xml, _) = render("\u{FEFF}name,value\n");
        assert!(xml.contains("<t>name</t>"));
    }

    #[test]
    fn test_special_chars_are_escaped() {
        let (xml, _) = render("\"<a&b>\"\n");
        assert!(xml.contains("&lt;a&amp;b&gt;"));
    }

    #[test]
    fn test_quoted_newline_stays_in_one_cell() {
        let (xml, stats) = render("\"line1\nline2\",x\n");
        assert_eq!(stats.rows, 1);
        assert!(xml.contains("line1\nline2"));
    }

    #[test]
    fn test_whitespace_is_preserved() {
        let (xml, _) = render("\" padded \"\n");
        assert!(xml.contains(r#"<t xml:space="preserve"> padded </t>"#));
    }

    #[test]
    fn test_custom_delimiter() {
        let mut out = Vec::new();
        let stats = write_worksheet(
            &mut out,
            "a;b;c\n".as_bytes(),
            b';',
            &WorkbookLimits::default(),
            "test",
        )
        .unwrap();
        assert_eq!(stats.columns, 3);
    }

    #[test]
    fn test_row_limit_exceeded() {
        let limits = WorkbookLimits {
            max_rows: 2,
            ..WorkbookLimits::default()
        };
        let result = write_worksheet(
            &mut Vec::new(),
            "1\n2\n3\n".as_bytes(),
            b',',
            &limits,
            "big",
        );
        match result {
            Err(CsvBookError::LimitExceeded { sheet, message }) => {
                assert_eq!(sheet, "big");
                assert!(message.contains("row 3"));
            }
            other => panic!("Expected LimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_column_limit_exceeded() {
        let limits = WorkbookLimits {
            max_columns: 2,
            ..WorkbookLimits::default()
        };
        let result = write_worksheet(
            &mut Vec::new(),
            "a,b,c\n".as_bytes(),
            b',',
            &limits,
            "wide",
        );
        assert!(matches!(result, Err(CsvBookError::LimitExceeded { .. })));
    }

    #[test]
    fn test_empty_input_writes_empty_sheet() {
        let (xml, stats) = render("");
        assert_eq!(stats, SheetStats::default());
        assert!(xml.contains("<sheetData></sheetData>"));
    }

    #[test]
    fn test_encode_control_chars() {
        assert_eq!(encode_cell_text("a\u{1}b", 100), "a_x0001_b");
        assert_eq!(encode_cell_text("tab\there", 100), "tab\there");
        assert_eq!(encode_cell_text("\u{FFFF}", 100), "_xFFFF_");
    }

    #[test]
    fn test_encode_protects_literal_escape() {
        assert_eq!(encode_cell_text("_x0041_", 100), "_x005F_x0041_");
        assert_eq!(encode_cell_text("_x00", 100), "_x00");
        assert_eq!(encode_cell_text("snake_case", 100), "snake_case");
    }

    #[test]
    fn test_encode_truncates() {
        assert_eq!(encode_cell_text("abcdef", 3), "abc");
        assert_eq!(encode_cell_text("日本語テキスト", 3), "日本語");
    }
}
