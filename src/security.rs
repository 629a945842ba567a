//! Security Module
//!
//! ワークブック書き出し時の上限値を定義するモジュール。
//! Excelが開けないワークブックを生成しないよう、シートの行数・列数・セルの文字数を制限します。

/// Excelの1シートあたりの最大行数
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;

/// Excelの1シートあたりの最大列数（XFD）
pub const EXCEL_MAX_COLUMNS: u32 = 16_384;

/// Excelの1セルあたりの最大文字数
pub const EXCEL_MAX_CELL_CHARS: usize = 32_767;

/// ワークブックの上限設定
///
/// 行数・列数の上限を超えた場合は`CsvBookError::LimitExceeded`となり、
/// セルの文字数の上限を超えた場合は切り詰められます。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkbookLimits {
    /// 1シートあたりの最大行数
    /// デフォルト: 1,048,576
    pub max_rows: u32,
    /// 1シートあたりの最大列数
    /// デフォルト: 16,384
    pub max_columns: u32,
    /// 1セルあたりの最大文字数
    /// デフォルト: 32,767
    pub max_cell_chars: usize,
}

impl Default for WorkbookLimits {
    fn default() -> Self {
        Self {
            max_rows: EXCEL_MAX_ROWS,
            max_columns: EXCEL_MAX_COLUMNS,
            max_cell_chars: EXCEL_MAX_CELL_CHARS,
        }
    }
}

impl WorkbookLimits {
    /// 上限値を検証する
    ///
    /// # 戻り値
    ///
    /// * `Ok(())` - すべての値がExcelの上限以内かつ1以上の場合
    /// * `Err(String)` - 無効な値が含まれる場合
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_rows == 0 || self.max_rows > EXCEL_MAX_ROWS {
            return Err(format!(
                "max_rows must be between 1 and {} (got {})",
                EXCEL_MAX_ROWS, self.max_rows
            ));
        }
        if self.max_columns == 0 || self.max_columns > EXCEL_MAX_COLUMNS {
            return Err(format!(
                "max_columns must be between 1 and {} (got {})",
                EXCEL_MAX_COLUMNS, self.max_columns
            ));
        }
        if self.max_cell_chars == 0 || self.max_cell_chars > EXCEL_MAX_CELL_CHARS {
            return Err(format!(
                "max_cell_chars must be between 1 and {} (got {})",
                EXCEL_MAX_CELL_CHARS, self.max_cell_chars
            ));
        }
        Ok(())
    }
}
