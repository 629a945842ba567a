//! Package Parts
//!
//! ワークシート以外のOOXMLパッケージ構成要素を書き出す。

use std::io::{Seek, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::CsvBookError;
use crate::types::SheetEntry;
use crate::writer::{worksheet_path, OFFICE_REL_NS, SPREADSHEETML_NS};

const PACKAGE_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_CORE_PROPERTIES: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties";
const REL_EXTENDED_PROPERTIES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties";
const REL_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const REL_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

const CT_WORKBOOK: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const CT_WORKSHEET: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
const CT_CORE: &str = "application/vnd.openxmlformats-package.core-properties+xml";
const CT_APP: &str = "application/vnd.openxmlformats-officedocument.extended-properties+xml";

const STYLES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
    r#"<fonts count="1"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts>"#,
    r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
    r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
    r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
    r#"<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>"#,
    r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
    r#"</styleSheet>"#
);

/// ZIPエントリのオプション（Deflate圧縮）
pub(crate) fn entry_options() -> FileOptions {
    FileOptions::default().compression_method(zip::CompressionMethod::Deflated)
}

/// ワークシート以外のパッケージ構成要素をすべて書き出す
///
/// ワークシート本体（`xl/worksheets/sheetN.xml`）は呼び出し側で書き出し済みであること。
pub(crate) fn write_package_parts<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    sheets: &[SheetEntry],
    created: DateTime<Utc>,
) -> Result<(), CsvBookError> {
    write_part(zip, "[Content_Types].xml", &content_types_xml(sheets)?)?;
    write_part(zip, "_rels/.rels", &root_rels_xml()?)?;
    write_part(zip, "docProps/app.xml", &app_xml(sheets)?)?;
    write_part(zip, "docProps/core.xml", &core_xml(created)?)?;
    write_part(zip, "xl/workbook.xml", &workbook_xml(sheets)?)?;
    write_part(zip, "xl/_rels/workbook.xml.rels", &workbook_rels_xml(sheets)?)?;
    write_part(zip, "xl/styles.xml", STYLES_XML.as_bytes())?;
    Ok(())
}

fn write_part<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    path: &str,
    body: &[u8],
) -> Result<(), CsvBookError> {
    zip.start_file(path, entry_options())?;
    zip.write_all(body)?;
    Ok(())
}

fn new_document() -> Result<Writer<Vec<u8>>, CsvBookError> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    Ok(writer)
}

fn empty_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attrs: &[(&str, &str)],
) -> Result<(), CsvBookError> {
    let mut elem = BytesStart::new(name);
    for attr in attrs {
        elem.push_attribute(*attr);
    }
    writer.write_event(Event::Empty(elem))?;
    Ok(())
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<(), CsvBookError> {
    let mut elem = BytesStart::new(name);
    for attr in attrs {
        elem.push_attribute(*attr);
    }
    writer.write_event(Event::Start(elem))?;
    writer.write_event(Event::Text(quick_xml::events::BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn content_types_xml(sheets: &[SheetEntry]) -> Result<Vec<u8>, CsvBookError> {
    let mut w = new_document()?;
    let mut root = BytesStart::new("Types");
    root.push_attribute(("xmlns", CONTENT_TYPES_NS));
    w.write_event(Event::Start(root))?;

    empty_element(
        &mut w,
        "Default",
        &[
            ("Extension", "rels"),
            ("ContentType", "application/vnd.openxmlformats-package.relationships+xml"),
        ],
    )?;
    empty_element(
        &mut w,
        "Default",
        &[("Extension", "xml"), ("ContentType", "application/xml")],
    )?;
    empty_element(
        &mut w,
        "Override",
        &[("PartName", "/xl/workbook.xml"), ("ContentType", CT_WORKBOOK)],
    )?;
    for sheet in sheets {
        let part = format!("/{}", worksheet_path(sheet.sheet_id));
        empty_element(
            &mut w,
            "Override",
            &[("PartName", part.as_str()), ("ContentType", CT_WORKSHEET)],
        )?;
    }
    empty_element(
        &mut w,
        "Override",
        &[("PartName", "/xl/styles.xml"), ("ContentType", CT_STYLES)],
    )?;
    empty_element(
        &mut w,
        "Override",
        &[("PartName", "/docProps/core.xml"), ("ContentType", CT_CORE)],
    )?;
    empty_element(
        &mut w,
        "Override",
        &[("PartName", "/docProps/app.xml"), ("ContentType", CT_APP)],
    )?;

    w.write_event(Event::End(BytesEnd::new("Types")))?;
    Ok(w.into_inner())
}

fn root_rels_xml() -> Result<Vec<u8>, CsvBookError> {
    let mut w = new_document()?;
    let mut root = BytesStart::new("Relationships");
    root.push_attribute(("xmlns", PACKAGE_REL_NS));
    w.write_event(Event::Start(root))?;
    empty_element(
        &mut w,
        "Relationship",
        &[
            ("Id", "rId1"),
            ("Type", REL_OFFICE_DOCUMENT),
            ("Target", "xl/workbook.xml"),
        ],
    )?;
    empty_element(
        &mut w,
        "Relationship",
        &[
            ("Id", "rId2"),
            ("Type", REL_CORE_PROPERTIES),
            ("Target", "docProps/core.xml"),
        ],
    )?;
    empty_element(
        &mut w,
        "Relationship",
        &[
            ("Id", "rId3"),
            ("Type", REL_EXTENDED_PROPERTIES),
            ("Target", "docProps/app.xml"),
        ],
    )?;
    w.write_event(Event::End(BytesEnd::new("Relationships")))?;
    Ok(w.into_inner())
}

fn workbook_xml(sheets: &[SheetEntry]) -> Result<Vec<u8>, CsvBookError> {
    let mut w = new_document()?;
    let mut root = BytesStart::new("workbook");
    root.push_attribute(("xmlns", SPREADSHEETML_NS));
    root.push_attribute(("xmlns:r", OFFICE_REL_NS));
    w.write_event(Event::Start(root))?;

    // シートが1つもない場合は<sheets/>となる
    if sheets.is_empty() {
        w.write_event(Event::Empty(BytesStart::new("sheets")))?;
    } else {
        w.write_event(Event::Start(BytesStart::new("sheets")))?;
        for sheet in sheets {
            let id = sheet.sheet_id.to_string();
            let rel = format!("rId{}", sheet.sheet_id);
            empty_element(
                &mut w,
                "sheet",
                &[
                    ("name", sheet.name.as_str()),
                    ("sheetId", id.as_str()),
                    ("r:id", rel.as_str()),
                ],
            )?;
        }
        w.write_event(Event::End(BytesEnd::new("sheets")))?;
    }

    w.write_event(Event::End(BytesEnd::new("workbook")))?;
    Ok(w.into_inner())
}

fn workbook_rels_xml(sheets: &[SheetEntry]) -> Result<Vec<u8>, CsvBookError> {
    let mut w = new_document()?;
    let mut root = BytesStart::new("Relationships");
    root.push_attribute(("xmlns", PACKAGE_REL_NS));
    w.write_event(Event::Start(root))?;

    for sheet in sheets {
        let rel = format!("rId{}", sheet.sheet_id);
        let target = format!("worksheets/sheet{}.xml", sheet.sheet_id);
        empty_element(
            &mut w,
            "Relationship",
            &[
                ("Id", rel.as_str()),
                ("Type", REL_WORKSHEET),
                ("Target", target.as_str()),
            ],
        )?;
    }
    let styles_rel = format!("rId{}", sheets.len() + 1);
    empty_element(
        &mut w,
        "Relationship",
        &[
            ("Id", styles_rel.as_str()),
            ("Type", REL_STYLES),
            ("Target", "styles.xml"),
        ],
    )?;

    w.write_event(Event::End(BytesEnd::new("Relationships")))?;
    Ok(w.into_inner())
}

fn core_xml(created: DateTime<Utc>) -> Result<Vec<u8>, CsvBookError> {
    let timestamp = created.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut w = new_document()?;
    let mut root = BytesStart::new("cp:coreProperties");
    root.push_attribute((
        "xmlns:cp",
        "http://schemas.openxmlformats.org/package/2006/metadata/core-properties",
    ));
    root.push_attribute(("xmlns:dc", "http://purl.org/dc/elements/1.1/"));
    root.push_attribute(("xmlns:dcterms", "http://purl.org/dc/terms/"));
    root.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
    w.write_event(Event::Start(root))?;
    text_element(&mut w, "dc:creator", &[], "csvbook")?;
    text_element(
        &mut w,
        "dcterms:created",
        &[("xsi:type", "dcterms:W3CDTF")],
        &timestamp,
    )?;
    text_element(
        &mut w,
        "dcterms:modified",
        &[("xsi:type", "dcterms:W3CDTF")],
        &timestamp,
    )?;
    w.write_event(Event::End(BytesEnd::new("cp:coreProperties")))?;
    Ok(w.into_inner())
}

fn app_xml(sheets: &[SheetEntry]) -> Result<Vec<u8>, CsvBookError> {
    let mut w = new_document()?;
    let mut root = BytesStart::new("Properties");
    root.push_attribute((
        "xmlns",
        "http://schemas.openxmlformats.org/officeDocument/2006/extended-properties",
    ));
    w.write_event(Event::Start(root))?;
    text_element(&mut w, "Application", &[], "csvbook")?;
    text_element(&mut w, "DocSecurity", &[], "0")?;
    text_element(&mut w, "Worksheets", &[], &sheets.len().to_string())?;
    w.write_event(Event::End(BytesEnd::new("Properties")))?;
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, name: &str) -> SheetEntry {
        SheetEntry {
            sheet_id: id,
            name: name.to_string(),
            source: format!("{}.csv", name),
            rows: 1,
            columns: 1,
        }
    }

    #[test]
    fn test_workbook_lists_sheets_in_order() {
        let sheets = vec![entry(1, "jan"), entry(2, "feb")];
        let xml = String::from_utf8(workbook_xml(&sheets).unwrap()).unwrap();
        let jan = xml.find(r#"<sheet name="jan" sheetId="1" r:id="rId1"/>"#).unwrap();
        let feb = xml.find(r#"<sheet name="feb" sheetId="2" r:id="rId2"/>"#).unwrap();
        assert!(jan < feb);
    }

    #[test]
    fn test_workbook_escapes_sheet_names() {
        let xml = String::from_utf8(workbook_xml(&[entry(1, "R&D")]).unwrap()).unwrap();
        assert!(xml.contains(r#"name="R&amp;D""#));
    }

    #[test]
    fn test_empty_workbook_has_empty_sheets() {
        let xml = String::from_utf8(workbook_xml(&[]).unwrap()).unwrap();
        assert!(xml.contains("<sheets/>"));
    }

    #[test]
    fn test_styles_rel_follows_sheets() {
        let sheets = vec![entry(1, "a"), entry(2, "b")];
        let xml = String::from_utf8(workbook_rels_xml(&sheets).unwrap()).unwrap();
        assert!(xml.contains(r#"Id="rId3""#));
        assert!(xml.contains(r#"Target="styles.xml""#));
        assert!(xml.contains(r#"Target="worksheets/sheet2.xml""#));
    }

    #[test]
    fn test_content_types_override_each_sheet() {
        let sheets = vec![entry(1, "a"), entry(2, "b")];
        let xml = String::from_utf8(content_types_xml(&sheets).unwrap()).unwrap();
        assert!(xml.contains(r#"PartName="/xl/worksheets/sheet1.xml""#));
        assert!(xml.contains(r#"PartName="/xl/worksheets/sheet2.xml""#));
    }

    #[test]
    fn test_core_has_created_timestamp() {
        let created = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let xml = String::from_utf8(core_xml(created).unwrap()).unwrap();
        assert!(xml.contains("2024-03-01T12:00:00Z"));
    }
}
