//! Storage Module
//!
//! CSVの読み込み元・ワークブックの書き込み先となるBlobストレージへの狭いインターフェース。

mod azure;
mod memory;

pub use azure::{AzureBlobStore, StorageCredentials};
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::CsvBookError;

/// Blobの内容を先頭から読み出す非同期リーダー
///
/// 内容はストレージから逐次読み込まれ、全体がメモリに載ることはありません。
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// 一覧取得で得られるBlobの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    /// コンテナ内のBlob名（プレフィックスを含む）
    pub name: String,
    /// バイト数（取得できた場合）
    pub size: Option<u64>,
}

/// Blobストレージの操作
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// プレフィックスに一致するBlobを一覧取得する（名前順）
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobItem>, CsvBookError>;

    /// Blobの内容を読み出すリーダーを開く
    ///
    /// 存在しない場合は`CsvBookError::NotFound`を返します。
    async fn get(&self, container: &str, name: &str) -> Result<BlobReader, CsvBookError>;

    /// `length`バイトの内容をストリーミングで書き込み（上書き）、書き込んだBlobのURLを返す
    async fn put(
        &self,
        container: &str,
        name: &str,
        content: BlobReader,
        length: u64,
        content_type: &str,
    ) -> Result<String, CsvBookError>;

    /// URLで指定されたBlobを読み出すリーダーを開く
    ///
    /// このストアのエンドポイント外のURLは`CsvBookError::Validation`になります。
    async fn fetch_url(&self, url: &str) -> Result<BlobReader, CsvBookError>;
}
