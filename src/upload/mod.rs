//! Upload Module
//!
//! 完成したワークブックをアップロード先へ転送するモジュール。
//!
//! * `DirectUploader` - 1回のPUTで送信（小さなファイル、SAS付きURL）
//! * `ResumableUploadClient` - アップロードセッションでチャンク送信（大きなファイル）

mod direct;
mod resumable;
mod retry;

pub use direct::DirectUploader;
pub use resumable::{ResumableUploadClient, CHUNK_ALIGNMENT, DEFAULT_CHUNK_SIZE};
pub use retry::RetryPolicy;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Microsoft Graph v1.0のベースURL
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// パスセグメント用のエンコードセット
pub(crate) const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// SharePointドキュメントライブラリ（Graphのドライブ）上の保存先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDriveTarget {
    pub site_id: String,
    pub drive_id: String,
    /// ドライブルートからのフォルダパス（空ならルート直下）
    pub folder_path: String,
    base_url: String,
}

impl GraphDriveTarget {
    pub fn new(
        site_id: impl Into<String>,
        drive_id: impl Into<String>,
        folder_path: impl Into<String>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            drive_id: drive_id.into(),
            folder_path: folder_path.into(),
            base_url: GRAPH_BASE_URL.to_string(),
        }
    }

    /// GraphのベースURLを差し替える
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// ファイルのアイテムアドレス（`.../root:/{folder}/{file}:`）
    pub fn item_endpoint(&self, file_name: &str) -> String {
        let path = self
            .folder_path
            .split('/')
            .chain(std::iter::once(file_name))
            .filter(|s| !s.is_empty())
            .map(|s| utf8_percent_encode(s, SEGMENT_ENCODE_SET).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/sites/{}/drives/{}/root:/{}:",
            self.base_url, self.site_id, self.drive_id, path
        )
    }

    /// アップロードセッションの作成先
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use csvbook::GraphDriveTarget;
    ///
    /// let target = GraphDriveTarget::new("site", "drive", "Reports/2024");
    /// assert_eq!(
    ///     target.session_endpoint("a b.xlsx"),
    ///     "https://graph.microsoft.com/v1.0/sites/site/drives/drive/root:/Reports/2024/a%20b.xlsx:/createUploadSession"
    /// );
    /// ```
    pub fn session_endpoint(&self, file_name: &str) -> String {
        format!("{}/createUploadSession", self.item_endpoint(file_name))
    }
}
