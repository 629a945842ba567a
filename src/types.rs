//! Types Module
//!
//! クレート全体で使用する共通データ型を定義するモジュール。

use serde::{Deserialize, Serialize};

/// XLSXのMIMEタイプ
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// 変換元となる1つのCSVソース
///
/// `name`はワークシート名の導出にのみ使用されます。`content`は一度だけ消費されます。
#[derive(Debug)]
pub struct SourceRecord<R> {
    /// ソース名（例: `jan.csv`）
    pub name: String,
    /// CSVのバイトストリーム
    pub content: R,
}

impl<R> SourceRecord<R> {
    /// 新しいソースを生成
    pub fn new(name: impl Into<String>, content: R) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }
}

/// ワークブックに追加された1つのワークシートの情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetEntry {
    /// シートID（1始まり、追加順に連番）
    pub sheet_id: u32,
    /// サニタイズ・重複排除後のワークシート名
    pub name: String,
    /// 元のソース名
    pub source: String,
    /// 書き込んだ行数
    pub rows: u32,
    /// 最大フィールド数
    pub columns: u32,
}

/// 進行中の再開可能アップロードセッション
///
/// 完了または失敗で破棄され、プロセス再起動をまたいで保持されることはありません。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// サーバーが発行したチャンク送信先URL
    pub upload_url: String,
    /// 転送する総バイト数
    pub total_length: u64,
    /// 1チャンクの最大バイト数
    pub chunk_size: u64,
}

impl UploadSession {
    /// 総チャンク数（`ceil(total_length / chunk_size)`）
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.total_length.div_ceil(self.chunk_size)
    }
}

/// アップロード結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// アップロード先の正規URL
    pub destination_url: String,
}

impl UploadResult {
    /// 新しい結果を生成
    pub fn new(destination_url: impl Into<String>) -> Self {
        Self {
            destination_url: destination_url.into(),
        }
    }
}

/// セル座標（0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    /// 新しい座標を生成
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// A1形式の文字列に変換（例: (0, 0) -> "A1"）
    #[allow(clippy::wrong_self_convention)]
    pub fn to_a1_notation(&self) -> String {
        let mut out = Self::col_index_to_letter(self.col);
        out.push_str(&(self.row + 1).to_string());
        out
    }

    /// 列インデックスを文字列に変換（0 -> "A", 25 -> "Z", 26 -> "AA"）
    pub fn col_index_to_letter(mut col: u32) -> String {
        let mut result = String::new();
        loop {
            let remainder = col % 26;
            result.insert(0, (b'A' + remainder as u8) as char);
            if col < 26 {
                break;
            }
            col = col / 26 - 1;
        }
        result
    }
}
