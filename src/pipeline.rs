//! Pipeline Module
//!
//! ソースの一覧取得 → ワークブックへのストリーミング変換 → 配信 を順に実行するモジュール。
//! 1リクエストの各ステップは直列に実行され、前のステップの出力が揃うまで次のステップは開始しません。

use std::sync::Arc;

use percent_encoding::utf8_percent_encode;
use tokio_util::io::SyncIoBridge;
use tracing::{error, info};

use crate::auth::{TokenProvider, GRAPH_DEFAULT_SCOPE};
use crate::builder::{CsvConverter, FinishedWorkbook, WorkbookWriter};
use crate::error::CsvBookError;
use crate::selection::{file_name, is_csv_name, url_path, SourceSelection};
use crate::storage::{BlobReader, BlobStore};
use crate::types::{UploadResult, XLSX_CONTENT_TYPE};
use crate::upload::{
    DirectUploader, GraphDriveTarget, ResumableUploadClient, SEGMENT_ENCODE_SET,
};

/// 変換済みのワークブックと出力ファイル名
#[derive(Debug)]
pub struct CombinedWorkbook {
    /// 出力ファイル名（例: `merged-data-2024.xlsx`）
    pub file_name: String,
    /// ワークブック本体
    pub workbook: FinishedWorkbook,
}

/// Blobストレージ側の書き込み先
#[derive(Debug, Clone)]
pub enum BlobDestination {
    /// 設定済みのストアのコンテナへ書き込む
    Store { container: String },
    /// SAS付きのコンテナURLへ直接PUTする
    SasUrl { container_url: String },
}

/// SharePoint側の書き込み先
#[derive(Clone)]
pub enum SharePointTarget {
    /// Graphのアップロードセッション
    Graph {
        drive: GraphDriveTarget,
        tokens: Arc<dyn TokenProvider>,
    },
    /// フォルダURLへの単一PUT
    Direct { base_url: String, token: String },
}

impl std::fmt::Debug for SharePointTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SharePointTarget::Graph { drive, .. } => {
                f.debug_struct("Graph").field("drive", drive).finish_non_exhaustive()
            }
            SharePointTarget::Direct { base_url, .. } => f
                .debug_struct("Direct")
                .field("base_url", &url_path(base_url))
                .finish_non_exhaustive(),
        }
    }
}

/// 変換・配信パイプライン
pub struct ReportPipeline {
    store: Arc<dyn BlobStore>,
    converter: CsvConverter,
    http: reqwest::Client,
    resumable: ResumableUploadClient,
    environment: String,
    blob_destination: Option<BlobDestination>,
    sharepoint: Option<SharePointTarget>,
}

impl std::fmt::Debug for ReportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPipeline")
            .field("environment", &self.environment)
            .field("blob_destination", &self.blob_destination)
            .field("sharepoint", &self.sharepoint)
            .finish_non_exhaustive()
    }
}

impl ReportPipeline {
    /// 新しいパイプラインを生成
    ///
    /// `http`はプロセス全体で共有するコネクションプールです。
    pub fn new(store: Arc<dyn BlobStore>, converter: CsvConverter, http: reqwest::Client) -> Self {
        Self {
            store,
            converter,
            resumable: ResumableUploadClient::new(http.clone()),
            http,
            environment: String::new(),
            blob_destination: None,
            sharepoint: None,
        }
    }

    /// 環境名（出力ファイル名に使用）を指定する
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Blobストレージ側の書き込み先を指定する
    pub fn with_blob_destination(mut self, destination: BlobDestination) -> Self {
        self.blob_destination = Some(destination);
        self
    }

    /// SharePoint側の書き込み先を指定する
    pub fn with_sharepoint(mut self, target: SharePointTarget) -> Self {
        self.sharepoint = Some(target);
        self
    }

    /// アップロードセッションのクライアントを差し替える
    pub fn with_upload_client(mut self, client: ResumableUploadClient) -> Self {
        self.resumable = client;
        self
    }

    /// 環境名
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// 選択されたCSVを1つのワークブックに変換する
    ///
    /// ソースは名前順に1つずつ開き、ダウンロードしながらワークシートとして書き出します。
    /// ソース全体がメモリに載ることはありません。
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::NotFound`: 対象のCSVが1つもない場合
    /// * `CsvBookError::Downstream` / `Transport`: ストレージの読み込みに失敗した場合
    pub async fn combine(
        &self,
        selection: &SourceSelection,
    ) -> Result<CombinedWorkbook, CsvBookError> {
        let sources = self.list_sources(selection).await?;
        if sources.is_empty() {
            info!(selection = %selection.describe(), "no CSV sources matched");
            return Err(CsvBookError::NotFound(format!(
                "no CSV files found for {}",
                selection.describe()
            )));
        }

        let mut writer = self.converter.writer()?;
        for source in &sources {
            let content = self.fetch(selection, source).await?;
            let name = file_name(url_path(source)).to_string();
            writer = append_blocking(writer, name, content).await?;
        }

        let workbook = tokio::task::spawn_blocking(move || writer.finish())
            .await
            .map_err(|e| CsvBookError::Internal(format!("workbook task failed: {}", e)))??;

        let file_name = selection.output_name(&self.environment);
        info!(
            selection = %selection.describe(),
            file = %file_name,
            sheets = workbook.sheets().len(),
            bytes = workbook.len(),
            "combined workbook"
        );
        Ok(CombinedWorkbook {
            file_name,
            workbook,
        })
    }

    /// 変換対象のBlob名（URL指定の場合はURL）を名前順に取得する
    async fn list_sources(&self, selection: &SourceSelection) -> Result<Vec<String>, CsvBookError> {
        let (Some(container), Some(prefix)) = (selection.container(), selection.prefix()) else {
            return match selection {
                SourceSelection::BlobUrl { url } if is_csv_name(url_path(url)) => {
                    Ok(vec![url.clone()])
                }
                _ => Ok(Vec::new()),
            };
        };

        let items = self.store.list(container, &prefix).await.map_err(|e| {
            error!(container, prefix = %prefix, error = %e, "failed to list blobs");
            e
        })?;
        let mut names: Vec<String> = items
            .into_iter()
            .map(|item| item.name)
            .filter(|name| is_csv_name(name))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn fetch(
        &self,
        selection: &SourceSelection,
        source: &str,
    ) -> Result<BlobReader, CsvBookError> {
        let result = match selection.container() {
            Some(container) => self.store.get(container, source).await,
            None => self.store.fetch_url(source).await,
        };
        result.map_err(|e| {
            error!(
                container = selection.container().unwrap_or_default(),
                blob = %url_path(source),
                error = %e,
                "failed to read source"
            );
            e
        })
    }

    /// ワークブックをBlobストレージへ書き込む
    ///
    /// ステージングされたワークブックを読み出しながら送信します。
    pub async fn deliver_to_blob(
        &self,
        combined: CombinedWorkbook,
    ) -> Result<UploadResult, CsvBookError> {
        let destination = self.blob_destination.as_ref().ok_or_else(|| {
            CsvBookError::Config("blob destination is not configured".to_string())
        })?;
        let CombinedWorkbook {
            file_name,
            workbook,
        } = combined;
        let length = workbook.len();
        let content = workbook.into_async_reader();

        let result = match destination {
            BlobDestination::Store { container } => {
                let url = self
                    .store
                    .put(container, &file_name, content, length, XLSX_CONTENT_TYPE)
                    .await?;
                UploadResult::new(url)
            }
            BlobDestination::SasUrl { container_url } => {
                let url = append_file_to_url(container_url, &file_name);
                DirectUploader::new(self.http.clone())
                    .with_header("x-ms-blob-type", "BlockBlob")
                    .put_stream(&url, content, length, XLSX_CONTENT_TYPE, None)
                    .await?
            }
        };

        info!(file = %file_name, "delivered workbook to blob storage");
        Ok(result)
    }

    /// ワークブックをSharePointへアップロードする
    pub async fn deliver_to_sharepoint(
        &self,
        combined: CombinedWorkbook,
    ) -> Result<UploadResult, CsvBookError> {
        let target = self.sharepoint.as_ref().ok_or_else(|| {
            CsvBookError::Config("SharePoint destination is not configured".to_string())
        })?;
        let CombinedWorkbook {
            file_name,
            workbook,
        } = combined;

        let result = match target {
            SharePointTarget::Graph { drive, tokens } => {
                let token = tokens.token(GRAPH_DEFAULT_SCOPE).await?;
                let total_length = workbook.len();
                let reader = workbook.into_async_reader();
                self.resumable
                    .upload(
                        reader,
                        total_length,
                        &file_name,
                        &drive.item_endpoint(&file_name),
                        &token,
                    )
                    .await?
            }
            SharePointTarget::Direct { base_url, token } => {
                let length = workbook.len();
                let url = append_file_to_url(base_url, &file_name);
                let bearer = (!token.is_empty()).then_some(token.as_str());
                DirectUploader::new(self.http.clone())
                    .put_stream(
                        &url,
                        workbook.into_async_reader(),
                        length,
                        XLSX_CONTENT_TYPE,
                        bearer,
                    )
                    .await?
            }
        };

        info!(file = %file_name, "delivered workbook to SharePoint");
        Ok(result)
    }

    /// 変換してBlobストレージへ書き込む
    pub async fn run_to_blob(
        &self,
        selection: &SourceSelection,
    ) -> Result<UploadResult, CsvBookError> {
        let combined = self.combine(selection).await?;
        self.deliver_to_blob(combined).await
    }

    /// 変換してSharePointへアップロードする
    pub async fn run_to_sharepoint(
        &self,
        selection: &SourceSelection,
    ) -> Result<UploadResult, CsvBookError> {
        let combined = self.combine(selection).await?;
        self.deliver_to_sharepoint(combined).await
    }
}

/// CSVの書き出しをブロッキングスレッドで実行する
///
/// ソースの非同期リーダーを同期`Read`に橋渡しし、読み込みながら書き出します。
async fn append_blocking(
    mut writer: WorkbookWriter,
    name: String,
    content: BlobReader,
) -> Result<WorkbookWriter, CsvBookError> {
    let input = SyncIoBridge::new(content);
    tokio::task::spawn_blocking(move || {
        writer.append_csv(&name, input)?;
        Ok(writer)
    })
    .await
    .map_err(|e| CsvBookError::Internal(format!("workbook task failed: {}", e)))?
}

/// フォルダURL（クエリ付きでもよい）の末尾にファイル名を追加する
pub(crate) fn append_file_to_url(base: &str, file_name: &str) -> String {
    let (path, query) = match base.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (base, None),
    };
    let mut url = format!(
        "{}/{}",
        path.trim_end_matches('/'),
        utf8_percent_encode(file_name, SEGMENT_ENCODE_SET)
    );
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}
