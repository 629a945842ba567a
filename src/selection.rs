//! Selection Module
//!
//! 変換対象のCSVをどこから読み込み、出力ワークブックをどう命名するかを定義するモジュール。
//! プレフィックスとファイル名は既存の運用と互換性を保つため、形式を変更しないでください。

use chrono::NaiveDate;

/// 変換対象のソース選択
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    /// フォルダ指定（プレフィックス`{folder}/`）
    Folder { container: String, folder: String },

    /// クライアント指定（プレフィックス`clients/{client_name}`）
    Client {
        container: String,
        client_name: String,
    },

    /// メンバーファーム・日付指定（プレフィックス`Reports/{id}/{yyyy}/{MM}/{dd}/`）
    MemberFirm {
        container: String,
        member_firm_id: String,
        date: NaiveDate,
    },

    /// URL指定の単一CSV
    BlobUrl { url: String },
}

impl SourceSelection {
    /// 一覧取得の対象コンテナ（URL指定の場合は`None`）
    pub fn container(&self) -> Option<&str> {
        match self {
            SourceSelection::Folder { container, .. }
            | SourceSelection::Client { container, .. }
            | SourceSelection::MemberFirm { container, .. } => Some(container),
            SourceSelection::BlobUrl { .. } => None,
        }
    }

    /// 一覧取得のプレフィックス（URL指定の場合は`None`）
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use chrono::NaiveDate;
    /// use csvbook::SourceSelection;
    ///
    /// let selection = SourceSelection::MemberFirm {
    ///     container: "reports".to_string(),
    ///     member_firm_id: "MF01".to_string(),
    ///     date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
    /// };
    /// assert_eq!(selection.prefix().unwrap(), "Reports/MF01/2024/03/05/");
    /// ```
    pub fn prefix(&self) -> Option<String> {
        match self {
            SourceSelection::Folder { folder, .. } => Some(format!("{}/", folder)),
            SourceSelection::Client { client_name, .. } => {
                Some(format!("clients/{}", client_name))
            }
            SourceSelection::MemberFirm {
                member_firm_id,
                date,
                ..
            } => Some(format!(
                "Reports/{}/{}/",
                member_firm_id,
                date.format("%Y/%m/%d")
            )),
            SourceSelection::BlobUrl { .. } => None,
        }
    }

    /// 出力ワークブックのファイル名
    ///
    /// * フォルダ: `merged-{container}-{folderLabel}.xlsx`
    /// * クライアント: `merged-{container}-clients-{clientLabel}.xlsx`
    /// * メンバーファーム: `ActivityReports_{env}_{yyyy}_{MM}_{dd}.xlsx`
    /// * URL: `{CSVファイル名の拡張子なし}.xlsx`
    pub fn output_name(&self, environment: &str) -> String {
        match self {
            SourceSelection::Folder { container, folder } => {
                format!("merged-{}-{}.xlsx", container, folder_label(folder))
            }
            SourceSelection::Client {
                container,
                client_name,
            } => format!(
                "merged-{}-{}.xlsx",
                container,
                folder_label(&format!("clients/{}", client_name))
            ),
            SourceSelection::MemberFirm { date, .. } => format!(
                "ActivityReports_{}_{}.xlsx",
                environment,
                date.format("%Y_%m_%d")
            ),
            SourceSelection::BlobUrl { url } => {
                let name = file_name(url_path(url));
                let stem = crate::sheet_name::strip_extension(name);
                if stem.is_empty() {
                    "merged.xlsx".to_string()
                } else {
                    format!("{}.xlsx", stem)
                }
            }
        }
    }

    /// ログ出力用の短い説明
    pub fn describe(&self) -> String {
        match self {
            SourceSelection::BlobUrl { url } => format!("url {}", url_path(url)),
            other => format!(
                "{}/{}",
                other.container().unwrap_or_default(),
                other.prefix().unwrap_or_default()
            ),
        }
    }
}

/// フォルダパスをファイル名用のラベルに変換する（`/`を`-`に置換し、前後の`-`を除去）
pub fn folder_label(folder: &str) -> String {
    folder.replace('/', "-").trim_matches('-').to_string()
}

/// 変換対象のCSVかどうか（拡張子`.csv`、大文字小文字を区別しない）
pub fn is_csv_name(name: &str) -> bool {
    name.len() >= 4
        && name.is_char_boundary(name.len() - 4)
        && name[name.len() - 4..].eq_ignore_ascii_case(".csv")
}

/// パスの最後の`/`以降を取得する
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// URLからクエリ（SAS署名など）とフラグメントを取り除く
pub(crate) fn url_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
