//! Public API Types
//!
//! 公開APIで使用する列挙型を定義するモジュール。

/// ワークブックのステージング方式
///
/// 書き出し中のワークブック（ZIPアーカイブ）をどこに保持するかを指定します。
/// ZIPの書き込みにはシーク可能な出力先が必要なため、最終的な送信先へ直接
/// ストリーミングすることはできません。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Staging {
    /// メモリ上のバッファに保持（デフォルト）
    #[default]
    Memory,

    /// 名前のない一時ファイルに保持
    ///
    /// ファイルはOSにより削除されるため、成功・エラー・キャンセルのいずれの
    /// 経路でもディスク上に残りません。大きなワークブック向けです。
    TempFile,
}

impl Staging {
    /// 設定文字列から解析する（`memory` / `tempfile`、大文字小文字を区別しない）
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(Staging::Memory),
            "tempfile" | "temp" | "file" => Some(Staging::TempFile),
            _ => None,
        }
    }
}

/// アップロード先に同名ファイルが存在する場合の動作
///
/// Graphの`@microsoft.graph.conflictBehavior`に対応します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ConflictBehavior {
    /// 既存ファイルを置き換える（デフォルト）
    #[default]
    Replace,

    /// 新しい名前で保存する
    Rename,

    /// 失敗させる
    Fail,
}

impl ConflictBehavior {
    /// Graph APIで使用する文字列表現
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Rename => "rename",
            ConflictBehavior::Fail => "fail",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_parse() {
        assert_eq!(Staging::parse("memory"), Some(Staging::Memory));
        assert_eq!(Staging::parse(" TempFile "), Some(Staging::TempFile));
        assert_eq!(Staging::parse("disk"), None);
        assert_eq!(Staging::default(), Staging::Memory);
    }

    #[test]
    fn test_conflict_behavior_strings() {
        assert_eq!(ConflictBehavior::default().as_str(), "replace");
        assert_eq!(ConflictBehavior::Rename.as_str(), "rename");
        assert_eq!(ConflictBehavior::Fail.as_str(), "fail");
    }
}
