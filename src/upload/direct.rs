//! 単一PUTによるアップロード

use bytes::Bytes;
use reqwest::Body;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::CsvBookError;
use crate::selection::url_path;
use crate::types::UploadResult;

/// 内容全体を1回のPUTで送信するアップローダー
///
/// 小さなワークブックや、SAS付きURLへのBlob書き込みに使用します。
/// 本文はバッファ（`put`）またはストリーム（`put_stream`）で渡せます。
#[derive(Debug, Clone)]
pub struct DirectUploader {
    client: reqwest::Client,
    headers: Vec<(String, String)>,
}

impl DirectUploader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            headers: Vec::new(),
        }
    }

    /// すべてのリクエストに付与するヘッダーを追加する
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use csvbook::DirectUploader;
    ///
    /// let uploader = DirectUploader::new(reqwest::Client::new())
    ///     .with_header("x-ms-blob-type", "BlockBlob");
    /// ```
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// バッファをPUTする
    ///
    /// # 引数
    ///
    /// * `url` - 送信先（SAS署名を含んでもよい）
    /// * `content` - 送信するデータ
    /// * `content_type` - Content-Type
    /// * `bearer` - Bearerトークン（SAS付きURLの場合は`None`）
    ///
    /// # 戻り値
    ///
    /// レスポンスがJSONで`webUrl`を含む場合はその値、それ以外はクエリを除いた`url`
    pub async fn put(
        &self,
        url: &str,
        content: Bytes,
        content_type: &str,
        bearer: Option<&str>,
    ) -> Result<UploadResult, CsvBookError> {
        let length = content.len() as u64;
        self.send(url, Body::from(content), length, content_type, bearer)
            .await
    }

    /// `length`バイトのストリームをPUTする
    ///
    /// 内容はメモリに読み込まず、読み出しながら送信します。
    pub async fn put_stream<R>(
        &self,
        url: &str,
        content: R,
        length: u64,
        content_type: &str,
        bearer: Option<&str>,
    ) -> Result<UploadResult, CsvBookError>
    where
        R: AsyncRead + Send + 'static,
    {
        let body = Body::wrap_stream(ReaderStream::new(content));
        self.send(url, body, length, content_type, bearer).await
    }

    async fn send(
        &self,
        url: &str,
        body: Body,
        length: u64,
        content_type: &str,
        bearer: Option<&str>,
    ) -> Result<UploadResult, CsvBookError> {
        let mut request = self
            .client
            .put(url)
            .header("Content-Type", content_type)
            .header("Content-Length", length)
            .body(body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let destination = url_path(url);
        info!(url = destination, bytes = length, "PUT workbook");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CsvBookError::downstream("upload target", status.as_u16(), &body));
        }

        let body = response.bytes().await?;
        let web_url = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|v| v.get("webUrl").and_then(Value::as_str).map(str::to_string));

        Ok(UploadResult::new(
            web_url.unwrap_or_else(|| destination.to_string()),
        ))
    }
}
