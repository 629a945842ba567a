//! プロセス内のBlobストア（テスト・ローカル実行用）

use std::collections::BTreeMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::{BlobItem, BlobReader, BlobStore};
use crate::error::CsvBookError;

const SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
struct StoredBlob {
    content: Bytes,
    content_type: String,
}

/// メモリ上のBlobストア
///
/// URLは`memory://{container}/{name}`の形式です。
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<(String, String), StoredBlob>>,
}

impl MemoryBlobStore {
    /// 空のストアを生成
    pub fn new() -> Self {
        Self::default()
    }

    /// Blobを追加したストアを返す
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use csvbook::MemoryBlobStore;
    ///
    /// let store = MemoryBlobStore::new()
    ///     .with_blob("reports", "2024/jan.csv", "a,b\n1,2\n");
    /// ```
    pub fn with_blob(
        mut self,
        container: &str,
        name: &str,
        content: impl Into<Bytes>,
    ) -> Self {
        self.blobs.get_mut().insert(
            (container.to_string(), name.to_string()),
            StoredBlob {
                content: content.into(),
                content_type: "text/csv".to_string(),
            },
        );
        self
    }

    /// Blobの内容を取得する
    pub async fn content(&self, container: &str, name: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), name.to_string()))
            .map(|b| b.content.clone())
    }

    /// 書き込まれたBlobのContent-Typeを取得する
    pub async fn content_type(&self, container: &str, name: &str) -> Option<String> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), name.to_string()))
            .map(|b| b.content_type.clone())
    }

    /// 保持しているBlobの数
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Blobを1つも保持していないかどうか
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    fn url(container: &str, name: &str) -> String {
        format!("{}{}/{}", SCHEME, container, name)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobItem>, CsvBookError> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .iter()
            .filter(|((c, name), _)| c == container && name.starts_with(prefix))
            .map(|((_, name), blob)| BlobItem {
                name: name.clone(),
                size: Some(blob.content.len() as u64),
            })
            .collect())
    }

    async fn get(&self, container: &str, name: &str) -> Result<BlobReader, CsvBookError> {
        let content = self.content(container, name).await.ok_or_else(|| {
            CsvBookError::NotFound(format!("blob {}/{} not found", container, name))
        })?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        mut content: BlobReader,
        length: u64,
        content_type: &str,
    ) -> Result<String, CsvBookError> {
        let mut buf = Vec::with_capacity(length as usize);
        content.read_to_end(&mut buf).await?;
        self.blobs.write().await.insert(
            (container.to_string(), name.to_string()),
            StoredBlob {
                content: Bytes::from(buf),
                content_type: content_type.to_string(),
            },
        );
        Ok(Self::url(container, name))
    }

    async fn fetch_url(&self, url: &str) -> Result<BlobReader, CsvBookError> {
        let path = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| CsvBookError::Validation(format!("unsupported blob URL: {}", url)))?;
        let (container, name) = path
            .split_once('/')
            .ok_or_else(|| CsvBookError::Validation(format!("unsupported blob URL: {}", url)))?;
        self.get(container, name).await
    }
}
