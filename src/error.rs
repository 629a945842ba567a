//! Error Types Module
//!
//! クレート全体で使用する構造化エラー型を定義するモジュール。
//! `thiserror`を使用して、エラーの自動変換とメッセージフォーマットを実現する。

use thiserror::Error;

/// エラーの分類
///
/// 呼び出し元（HTTP層）がレスポンスを決定するための粗い分類です。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 必須フィールドの欠落・解析不能（クライアントエラー、リトライ不可）
    Validation,
    /// 選択条件に一致するソースが存在しない
    NotFound,
    /// APIキーがない、または一致しない
    Unauthorized,
    /// 外部サービス（ストレージ、Graph、Key Vault）との通信失敗
    Downstream,
    /// 外部サービスのレスポンスが期待した形式でない（統合エラー）
    Protocol,
    /// 設定の不備
    Config,
    /// 上記以外の内部エラー
    Internal,
}

impl ErrorKind {
    /// レスポンス・状態照会で使用するラベル
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Downstream => "downstream",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }

    /// サーバー側の失敗かどうか（詳細はログにのみ出力する）
    pub fn is_server_error(self) -> bool {
        matches!(
            self,
            ErrorKind::Downstream | ErrorKind::Protocol | ErrorKind::Config | ErrorKind::Internal
        )
    }
}

/// csvbookクレート全体で使用するエラー型
///
/// CSVの読み込み、ワークブックの書き出し、アップロード処理中に発生する
/// すべてのエラーを統一的に扱うために使用されます。
///
/// # 使用例
///
/// ```rust,no_run
/// use csvbook::CsvBookError;
/// use std::fs::File;
///
/// fn read_csv_file(path: &str) -> Result<(), CsvBookError> {
///     let file = File::open(path)?;  // Ioエラーが自動的に変換される
///     // ... 処理 ...
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum CsvBookError {
    /// I/O操作中に発生したエラー
    ///
    /// `#[from]`属性により、`std::io::Error`から自動的に変換されます。
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSVの読み込み中に発生したエラー
    ///
    /// 不正な行はベストエフォートで読み込まれるため、通常は下位のI/Oエラーのみが
    /// ここに到達します。
    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    /// ZIPアーカイブの書き込みエラー
    #[error("ZIP archive error: {0}")]
    Zip(String),

    /// XMLの書き込み・解析エラー
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSONのシリアライズ・デシリアライズエラー
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 設定の検証に失敗したエラー
    ///
    /// `WorkbookBuilder::build()`や`AppConfig::from_env()`で無効な設定が
    /// 検出された場合に発生します。
    ///
    /// # 例
    ///
    /// ```rust,no_run
    /// use csvbook::{CsvBookError, WorkbookBuilder};
    ///
    /// let result = WorkbookBuilder::new()
    ///     .with_delimiter(b'"')  // 無効な区切り文字
    ///     .build();
    ///
    /// match result {
    ///     Err(CsvBookError::Config(msg)) => {
    ///         println!("設定エラー: {}", msg);
    ///     }
    ///     _ => {}
    /// }
    /// ```
    #[error("Configuration error: {0}")]
    Config(String),

    /// Excelの上限を超えたエラー
    ///
    /// 1シートあたりの最大行数・最大列数を超えるCSVが入力された場合に発生します。
    #[error("Limit exceeded in sheet '{sheet}': {message}")]
    LimitExceeded {
        /// エラーが発生したシート名
        sheet: String,
        /// エラーの詳細メッセージ
        message: String,
    },

    /// リクエストの検証エラー
    #[error("Invalid request: {0}")]
    Validation(String),

    /// 変換対象が見つからないエラー
    #[error("Not found: {0}")]
    NotFound(String),

    /// 認証に失敗したエラー
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTPトランスポートのエラー（接続失敗、タイムアウトなど）
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 外部サービスが失敗ステータスを返したエラー
    #[error("{service} returned HTTP {status}: {message}")]
    Downstream {
        /// 呼び出したサービス（例: "blob storage"）
        service: String,
        /// HTTPステータスコード
        status: u16,
        /// レスポンス本文（要約）
        message: String,
    },

    /// 外部サービスのレスポンスに期待したフィールドがないエラー
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// アップロードのチャンクが拒否されたエラー
    #[error("Upload chunk at offset {offset} rejected with HTTP {status}")]
    UploadRejected {
        /// 拒否されたチャンクの開始オフセット
        offset: u64,
        /// HTTPステータスコード
        status: u16,
    },

    /// 終端レスポンスを受け取らずにストリームが尽きたエラー
    #[error("Upload stream ended after {sent} of {total} bytes without a completion response")]
    UploadIncomplete {
        /// 送信済みバイト数
        sent: u64,
        /// 宣言した総バイト数
        total: u64,
    },

    /// その他の内部エラー
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<zip::result::ZipError> for CsvBookError {
    fn from(e: zip::result::ZipError) -> Self {
        CsvBookError::Zip(e.to_string())
    }
}

impl CsvBookError {
    /// エラーの分類を取得する
    pub fn kind(&self) -> ErrorKind {
        match self {
            CsvBookError::Validation(_) => ErrorKind::Validation,
            CsvBookError::NotFound(_) => ErrorKind::NotFound,
            CsvBookError::Unauthorized(_) => ErrorKind::Unauthorized,
            CsvBookError::Transport(_)
            | CsvBookError::Downstream { .. }
            | CsvBookError::UploadRejected { .. }
            | CsvBookError::UploadIncomplete { .. } => ErrorKind::Downstream,
            CsvBookError::Protocol(_) => ErrorKind::Protocol,
            CsvBookError::Config(_) => ErrorKind::Config,
            CsvBookError::Io(_)
            | CsvBookError::Csv(_)
            | CsvBookError::Zip(_)
            | CsvBookError::Xml(_)
            | CsvBookError::Json(_)
            | CsvBookError::LimitExceeded { .. }
            | CsvBookError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 呼び出し元に返してよいメッセージ
    ///
    /// サーバー側の失敗では下位サービスの応答本文などを含めず、汎用的な文言を返します。
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Downstream => "an upstream service failed".to_string(),
            kind if kind.is_server_error() => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// 外部サービスの失敗ステータスからエラーを生成する
    ///
    /// 本文は長すぎる場合に切り詰めます。
    pub(crate) fn downstream(service: &str, status: u16, body: &str) -> Self {
        const MAX_BODY: usize = 512;
        let message: String = body.chars().take(MAX_BODY).collect();
        CsvBookError::Downstream {
            service: service.to_string(),
            status,
            message,
        }
    }
}
