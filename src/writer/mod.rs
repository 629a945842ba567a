//! Writer Module
//!
//! SpreadsheetML（XLSX）パッケージの書き出しを実装するモジュール。
//! quick-xmlのライターをZIPエントリに直接接続し、ワークシートをストリーミングで生成します。

mod package;
mod worksheet;

pub(crate) use package::{entry_options, write_package_parts};
pub(crate) use worksheet::{is_xml_char, write_worksheet};

/// SpreadsheetMLのメイン名前空間
pub(crate) const SPREADSHEETML_NS: &str =
    "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

/// Office Document リレーションシップ名前空間
pub(crate) const OFFICE_REL_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// ワークシートのZIP内パス（シートIDは1始まり）
pub(crate) fn worksheet_path(sheet_id: u32) -> String {
    format!("xl/worksheets/sheet{}.xml", sheet_id)
}
