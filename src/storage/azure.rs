//! Azure Blob Storage（REST API）
//!
//! Shared Key（HMAC-SHA256）またはSASトークンで認証します。

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures_util::TryStreamExt;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Body, Method, StatusCode};
use sha2::Sha256;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use async_trait::async_trait;

use super::{BlobItem, BlobReader, BlobStore};
use crate::error::CsvBookError;
use crate::selection::url_path;

/// Blob REST APIのバージョン
const AZURE_API_VERSION: &str = "2023-11-03";

/// Blobパス用のエンコードセット（`/`はエンコードしない）
const BLOB_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// クエリ値用のエンコードセット
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SERVICE: &str = "blob storage";

/// ストレージアカウントの認証情報
#[derive(Clone)]
pub enum StorageCredentials {
    /// アカウントキーによるShared Key認証
    SharedKey { key: Vec<u8> },
    /// SASトークン（先頭の`?`なし）
    Sas { token: String },
    /// 認証なし（公開コンテナ、またはURLに署名を含む場合）
    Anonymous,
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 鍵・署名は出力しない
        let kind = match self {
            StorageCredentials::SharedKey { .. } => "SharedKey",
            StorageCredentials::Sas { .. } => "Sas",
            StorageCredentials::Anonymous => "Anonymous",
        };
        f.debug_tuple("StorageCredentials").field(&kind).finish()
    }
}

/// Azure Blob StorageのREST APIクライアント
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    client: reqwest::Client,
    /// Blobサービスのエンドポイント（末尾の`/`なし）
    endpoint: String,
    account: String,
    credentials: StorageCredentials,
}

impl AzureBlobStore {
    /// 新しいクライアントを生成
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        account: impl Into<String>,
        credentials: StorageCredentials,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            account: account.into(),
            credentials,
        }
    }

    /// 接続文字列から生成する
    ///
    /// `AccountName`、`AccountKey`、`SharedAccessSignature`、`BlobEndpoint`、
    /// `DefaultEndpointsProtocol`、`EndpointSuffix`を解釈します。
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Config`: 必要な項目がない、またはアカウントキーが不正なBase64
    pub fn from_connection_string(
        client: reqwest::Client,
        connection_string: &str,
    ) -> Result<Self, CsvBookError> {
        let mut account = None;
        let mut key = None;
        let mut sas = None;
        let mut blob_endpoint = None;
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();

        for part in connection_string.split(';') {
            let Some((name, value)) = part.trim().split_once('=') else {
                continue;
            };
            match name {
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => key = Some(value.to_string()),
                "SharedAccessSignature" => sas = Some(value.trim_start_matches('?').to_string()),
                "BlobEndpoint" => blob_endpoint = Some(value.to_string()),
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => suffix = value.to_string(),
                _ => {}
            }
        }

        let credentials = match (key, sas) {
            (Some(key), _) => {
                let key = BASE64_STANDARD.decode(key.trim()).map_err(|e| {
                    CsvBookError::Config(format!(
                        "Invalid AccountKey in connection string: {}",
                        e
                    ))
                })?;
                StorageCredentials::SharedKey { key }
            }
            (None, Some(token)) => StorageCredentials::Sas { token },
            (None, None) => {
                return Err(CsvBookError::Config(
                    "Connection string has neither AccountKey nor SharedAccessSignature"
                        .to_string(),
                ))
            }
        };

        let endpoint = match (blob_endpoint, &account) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!("{}://{}.blob.{}", protocol, account, suffix),
            (None, None) => {
                return Err(CsvBookError::Config(
                    "Connection string has neither AccountName nor BlobEndpoint".to_string(),
                ))
            }
        };

        let account = account.unwrap_or_default();
        if matches!(credentials, StorageCredentials::SharedKey { .. }) && account.is_empty() {
            return Err(CsvBookError::Config(
                "AccountName is required for Shared Key authentication".to_string(),
            ));
        }

        info!(endpoint = %endpoint, credentials = ?credentials, "blob storage client configured");
        Ok(Self::new(client, endpoint, account, credentials))
    }

    /// エンドポイント
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// このエンドポイント配下のURLを（コンテナ, エンコード済みBlob名）に分解する
    ///
    /// スキーム・ホストの比較は大文字小文字を区別しません。
    fn split_own_url<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let prefix = format!("{}/", self.endpoint);
        let head = path.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(&prefix) {
            return None;
        }
        path[prefix.len()..]
            .split_once('/')
            .filter(|(container, name)| !container.is_empty() && !name.is_empty())
    }

    /// BlobのURL（署名なし）
    pub fn blob_url(&self, container: &str, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            container,
            utf8_percent_encode(name, BLOB_PATH_ENCODE_SET)
        )
    }

    /// 1リクエストを組み立てて送信する
    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        method: Method,
        container: &str,
        blob: Option<&str>,
        query: &[(&str, &str)],
        body: Option<(Body, u64, &str)>,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, CsvBookError> {
        let mut url = match blob {
            Some(name) => self.blob_url(container, name),
            None => format!("{}/{}", self.endpoint, container),
        };
        let mut separator = '?';
        for (k, v) in query {
            url.push(separator);
            url.push_str(k);
            url.push('=');
            url.push_str(&utf8_percent_encode(v, QUERY_ENCODE_SET).to_string());
            separator = '&';
        }
        if let StorageCredentials::Sas { token } = &self.credentials {
            url.push(separator);
            url.push_str(token);
        }

        let date = httpdate::fmt_http_date(std::time::SystemTime::now());
        let (content_length, content_type) = match &body {
            Some((_, length, content_type)) => (*length, *content_type),
            None => (0, ""),
        };

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION);
        for (k, v) in extra_headers {
            request = request.header(*k, *v);
        }

        if let StorageCredentials::SharedKey { key } = &self.credentials {
            let mut resource = format!("/{}/{}", self.account, container);
            if let Some(name) = blob {
                resource.push('/');
                resource.push_str(name);
            }
            let mut ms_headers = vec![("x-ms-date", date.as_str()), ("x-ms-version", AZURE_API_VERSION)];
            ms_headers.extend(extra_headers.iter().filter(|(k, _)| k.starts_with("x-ms-")));
            let signature = shared_key_signature(
                key,
                method.as_str(),
                &resource,
                query,
                content_length,
                content_type,
                &ms_headers,
            )?;
            request = request.header(
                "Authorization",
                format!("SharedKey {}:{}", self.account, signature),
            );
        }

        if let Some((body, length, content_type)) = body {
            request = request
                .header("Content-Type", content_type)
                .header("Content-Length", length)
                .body(body);
        }

        Ok(request.send().await?)
    }
}

/// Shared Key認証の署名を計算する
///
/// 署名対象文字列:
///
/// ```text
/// VERB\nContent-Encoding\nContent-Language\nContent-Length\nContent-MD5\nContent-Type\n
/// Date\nIf-Modified-Since\nIf-Match\nIf-None-Match\nIf-Unmodified-Since\nRange\n
/// CanonicalizedHeaders\nCanonicalizedResource
/// ```
pub(crate) fn shared_key_signature(
    key: &[u8],
    method: &str,
    resource: &str,
    query: &[(&str, &str)],
    content_length: u64,
    content_type: &str,
    ms_headers: &[(&str, &str)],
) -> Result<String, CsvBookError> {
    // Content-Lengthが0の場合は空文字列
    let content_length = match content_length {
        0 => String::new(),
        n => n.to_string(),
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), *v))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_headers = headers
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut canonical_resource = resource.to_string();
    let mut params: Vec<(String, &str)> = query
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), *v))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in params {
        canonical_resource.push_str(&format!("\n{}:{}", k, v));
    }

    let string_to_sign = format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
        method, content_length, content_type, canonical_headers, canonical_resource
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| CsvBookError::Config(format!("Invalid storage account key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// List Blobsのレスポンスを解析する
///
/// # 戻り値
///
/// Blobの一覧と、続きがある場合は`NextMarker`
pub(crate) fn parse_blob_list(body: &str) -> Result<(Vec<BlobItem>, Option<String>), CsvBookError> {
    let mut reader = Reader::from_str(body.trim_start_matches('\u{FEFF}'));
    reader.trim_text(true);

    let mut items = Vec::new();
    let mut next_marker = None;
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<BlobItem> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"Blob" {
                    current = Some(BlobItem {
                        name: String::new(),
                        size: None,
                    });
                }
                path.push(name);
            }
            Event::End(e) => {
                path.pop();
                if e.name().as_ref() == b"Blob" {
                    if let Some(item) = current.take().filter(|i| !i.name.is_empty()) {
                        items.push(item);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                match (path.last().map(Vec::as_slice), current.as_mut()) {
                    (Some(b"Name"), Some(item)) => item.name = text,
                    (Some(b"Content-Length"), Some(item)) => item.size = text.parse().ok(),
                    (Some(b"NextMarker"), _) if !text.is_empty() => next_marker = Some(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((items, next_marker))
}

/// レスポンス本文を逐次読み出すリーダーに変換する
fn body_reader(response: reqwest::Response) -> BlobReader {
    let stream = response.bytes_stream().map_err(std::io::Error::other);
    Box::new(StreamReader::new(Box::pin(stream)))
}

async fn error_for(response: reqwest::Response) -> CsvBookError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CsvBookError::downstream(SERVICE, status, &body)
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobItem>, CsvBookError> {
        let mut all = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("comp", "list"), ("prefix", prefix), ("restype", "container")];
            if let Some(m) = marker.as_deref() {
                query.push(("marker", m));
            }

            debug!(container, prefix, marker = ?marker, "listing blobs");
            let response = self
                .send(Method::GET, container, None, &query, None, &[])
                .await?;
            if !response.status().is_success() {
                return Err(error_for(response).await);
            }

            let body = response.text().await?;
            let (items, next) = parse_blob_list(&body)?;
            all.extend(items);

            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        info!(container, prefix, count = all.len(), "listed blobs");
        Ok(all)
    }

    async fn get(&self, container: &str, name: &str) -> Result<BlobReader, CsvBookError> {
        debug!(container, blob = name, "downloading blob");
        let response = self
            .send(Method::GET, container, Some(name), &[], None, &[])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CsvBookError::NotFound(format!(
                "blob {}/{} not found",
                container, name
            )));
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(body_reader(response))
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        content: BlobReader,
        length: u64,
        content_type: &str,
    ) -> Result<String, CsvBookError> {
        let body = Body::wrap_stream(ReaderStream::new(content));
        let response = self
            .send(
                Method::PUT,
                container,
                Some(name),
                &[],
                Some((body, length, content_type)),
                &[("x-ms-blob-type", "BlockBlob")],
            )
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        info!(container, blob = name, bytes = length, "uploaded blob");
        Ok(self.blob_url(container, name))
    }

    async fn fetch_url(&self, url: &str) -> Result<BlobReader, CsvBookError> {
        let path = url_path(url);
        let Some((container, encoded)) = self.split_own_url(path) else {
            warn!(url = path, "rejected blob URL outside the storage endpoint");
            return Err(CsvBookError::Validation(format!(
                "blob URL must be under {}",
                self.endpoint
            )));
        };

        // 署名なしURLは自身の認証情報で取得する
        if path.len() == url.len() {
            let name = percent_encoding::percent_decode_str(encoded).decode_utf8_lossy();
            return self.get(container, &name).await;
        }

        debug!(url = path, "downloading blob by signed URL");
        let response = self
            .client
            .get(url)
            .header("x-ms-version", AZURE_API_VERSION)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CsvBookError::NotFound(format!("blob {} not found", path)));
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(body_reader(response))
    }
}
