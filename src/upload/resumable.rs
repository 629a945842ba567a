//! 再開可能アップロード（アップロードセッション）
//!
//! 1. `{endpoint}/createUploadSession`にPOSTして`uploadUrl`を取得
//! 2. `uploadUrl`へ`Content-Range`付きのPUTをチャンクごとに送信
//! 3. 200/201のレスポンスで完了（`webUrl`を返す）、それ以外の2xxで次のチャンクへ

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::api::ConflictBehavior;
use crate::error::CsvBookError;
use crate::types::{UploadResult, UploadSession};
use crate::upload::RetryPolicy;

/// 既定のチャンクサイズ（10 MiB）
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// チャンクサイズの単位（320 KiB）
pub const CHUNK_ALIGNMENT: u64 = 320 * 1024;

const SESSION_SUFFIX: &str = "/createUploadSession";
const SERVICE: &str = "upload session";

/// 1チャンクの送信結果
#[derive(Debug)]
enum ChunkOutcome {
    /// 受理された（200/201以外の2xx）
    Accepted,
    /// 完了した（200/201）
    Completed(UploadResult),
}

/// 再開可能アップロードのクライアント
///
/// # 使用例
///
/// ```rust,no_run
/// use csvbook::ResumableUploadClient;
///
/// # async fn run() -> Result<(), csvbook::CsvBookError> {
/// let client = ResumableUploadClient::new(reqwest::Client::new());
/// let result = client
///     .upload_bytes(
///         vec![0u8; 1024].into(),
///         "report.xlsx",
///         "https://graph.microsoft.com/v1.0/sites/s/drives/d/root:/Reports/report.xlsx:",
///         "token",
///     )
///     .await?;
/// println!("{}", result.destination_url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ResumableUploadClient {
    client: reqwest::Client,
    chunk_size: u64,
    retry: RetryPolicy,
    conflict_behavior: ConflictBehavior,
}

impl ResumableUploadClient {
    /// 既定の設定（10 MiBチャンク、3回まで再試行、置き換え）で生成
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            conflict_behavior: ConflictBehavior::Replace,
        }
    }

    /// チャンクサイズを指定する
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Config`: 0、または320 KiBの倍数でない場合
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Result<Self, CsvBookError> {
        if chunk_size == 0 || chunk_size % CHUNK_ALIGNMENT != 0 {
            return Err(CsvBookError::Config(format!(
                "chunk size must be a positive multiple of {} bytes (got {})",
                CHUNK_ALIGNMENT, chunk_size
            )));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// 再試行ポリシーを指定する
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 同名ファイルが存在する場合の動作を指定する
    pub fn with_conflict_behavior(mut self, behavior: ConflictBehavior) -> Self {
        self.conflict_behavior = behavior;
        self
    }

    /// チャンクサイズ
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// アップロードセッションを作成する
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Downstream`: セッション作成が失敗ステータスを返した場合
    /// * `CsvBookError::Protocol`: レスポンスに`uploadUrl`がない場合
    pub async fn create_session(
        &self,
        endpoint: &str,
        name: &str,
        total_length: u64,
        token: &str,
    ) -> Result<UploadSession, CsvBookError> {
        let url = session_url(endpoint);
        let body = json!({
            "item": {
                "@microsoft.graph.conflictBehavior": self.conflict_behavior.as_str(),
                "name": name,
            }
        });

        info!(file = name, bytes = total_length, "creating upload session");
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CsvBookError::downstream(SERVICE, status.as_u16(), &text));
        }

        let descriptor: Value = response.json().await.map_err(|_| {
            CsvBookError::Protocol("upload session response is not valid JSON".to_string())
        })?;
        let upload_url = descriptor
            .get("uploadUrl")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                CsvBookError::Protocol("upload session response has no uploadUrl".to_string())
            })?;

        Ok(UploadSession {
            upload_url: upload_url.to_string(),
            total_length,
            chunk_size: self.chunk_size,
        })
    }

    /// ストリームをアップロードする
    ///
    /// # 引数
    ///
    /// * `reader` - 送信するデータ（`total_length`バイト）
    /// * `total_length` - 総バイト数
    /// * `name` - 保存先のファイル名
    /// * `endpoint` - セッション作成先（`/createUploadSession`の有無は問わない）
    /// * `token` - すべてのリクエストに付与するBearerトークン
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Validation`: `total_length`が0の場合
    /// * `CsvBookError::UploadRejected`: チャンクが拒否された場合
    /// * `CsvBookError::UploadIncomplete`: 完了レスポンスを受け取る前にストリームが尽きた場合
    pub async fn upload<R>(
        &self,
        mut reader: R,
        total_length: u64,
        name: &str,
        endpoint: &str,
        token: &str,
    ) -> Result<UploadResult, CsvBookError>
    where
        R: AsyncRead + Unpin + Send,
    {
        if total_length == 0 {
            return Err(CsvBookError::Validation(
                "cannot upload an empty file through an upload session".to_string(),
            ));
        }

        let session = self
            .create_session(endpoint, name, total_length, token)
            .await?;

        match self.transfer(&session, &mut reader, token).await {
            Ok(result) => {
                info!(file = name, bytes = total_length, "upload completed");
                Ok(result)
            }
            Err(e) => {
                warn!(file = name, error = %e, "upload failed; cancelling session");
                self.cancel(&session, token).await;
                Err(e)
            }
        }
    }

    /// バイト列をアップロードする
    pub async fn upload_bytes(
        &self,
        content: Bytes,
        name: &str,
        endpoint: &str,
        token: &str,
    ) -> Result<UploadResult, CsvBookError> {
        let total_length = content.len() as u64;
        self.upload(std::io::Cursor::new(content), total_length, name, endpoint, token)
            .await
    }

    async fn transfer<R>(
        &self,
        session: &UploadSession,
        reader: &mut R,
        token: &str,
    ) -> Result<UploadResult, CsvBookError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let total = session.total_length;
        let mut offset: u64 = 0;

        while offset < total {
            let want = session.chunk_size.min(total - offset);
            let mut buf = Vec::with_capacity(want as usize);
            (&mut *reader).take(want).read_to_end(&mut buf).await?;
            if buf.is_empty() {
                break;
            }

            let len = buf.len() as u64;
            match self.put_chunk(session, offset, Bytes::from(buf), token).await? {
                ChunkOutcome::Completed(result) => return Ok(result),
                ChunkOutcome::Accepted => offset += len,
            }
        }

        Err(CsvBookError::UploadIncomplete {
            sent: offset,
            total,
        })
    }

    async fn put_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: Bytes,
        token: &str,
    ) -> Result<ChunkOutcome, CsvBookError> {
        let len = chunk.len() as u64;
        let range = format!(
            "bytes {}-{}/{}",
            offset,
            offset + len - 1,
            session.total_length
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(range = %range, attempt, "sending chunk");

            let sent = self
                .client
                .put(&session.upload_url)
                .bearer_auth(token)
                .header("Content-Range", &range)
                .header("Content-Length", len)
                .body(chunk.clone())
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if self.retry.should_retry(attempt) => {
                    warn!(range = %range, attempt, error = %e, "chunk transport error; retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status().as_u16();
            match status {
                200 | 201 => {
                    let item: Value = response.json().await.map_err(|_| {
                        CsvBookError::Protocol("final chunk response is not valid JSON".to_string())
                    })?;
                    let web_url = item
                        .get("webUrl")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            CsvBookError::Protocol(
                                "final chunk response has no webUrl".to_string(),
                            )
                        })?;
                    return Ok(ChunkOutcome::Completed(UploadResult::new(web_url)));
                }
                // 202以外の成功ステータスも次のチャンクへ進む
                s if (200..300).contains(&s) => return Ok(ChunkOutcome::Accepted),
                s if RetryPolicy::is_retryable_status(s) && self.retry.should_retry(attempt) => {
                    warn!(range = %range, attempt, status = s, "chunk rejected; retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                s => {
                    return Err(CsvBookError::UploadRejected { offset, status: s });
                }
            }
        }
    }

    /// セッションを取り消す（失敗してもエラーにしない）
    async fn cancel(&self, session: &UploadSession, token: &str) {
        let result = self
            .client
            .delete(&session.upload_url)
            .bearer_auth(token)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!("upload session cancelled");
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "failed to cancel upload session");
            }
            Err(e) => {
                warn!(error = %e, "failed to cancel upload session");
            }
        }
    }
}

/// セッション作成先のURL
fn session_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with(SESSION_SUFFIX) {
        endpoint.to_string()
    } else {
        format!("{}{}", endpoint, SESSION_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url() {
        assert_eq!(
            session_url("https://g/root:/a/b.xlsx:"),
            "https://g/root:/a/b.xlsx:/createUploadSession"
        );
        assert_eq!(
            session_url("https://g/root:/a/b.xlsx:/createUploadSession"),
            "https://g/root:/a/b.xlsx:/createUploadSession"
        );
    }

    #[test]
    fn test_chunk_size_validation() {
        let client = ResumableUploadClient::new(reqwest::Client::new());
        assert_eq!(client.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(DEFAULT_CHUNK_SIZE % CHUNK_ALIGNMENT, 0);

        assert!(client.clone().with_chunk_size(CHUNK_ALIGNMENT * 2).is_ok());
        assert!(matches!(
            client.clone().with_chunk_size(1000),
            Err(CsvBookError::Config(_))
        ));
        assert!(matches!(
            client.with_chunk_size(0),
            Err(CsvBookError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected_before_session() {
        let client = ResumableUploadClient::new(reqwest::Client::new());
        let result = client
            .upload_bytes(Bytes::new(), "a.xlsx", "http://127.0.0.1:9/x", "t")
            .await;
        assert!(matches!(result, Err(CsvBookError::Validation(_))));
    }
}
