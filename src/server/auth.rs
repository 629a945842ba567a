//! APIキーによる認証
//!
//! ヘルスチェック以外のルートは、`x-api-key`ヘッダーまたは
//! `Authorization: Bearer <key>`で設定済みのキーを提示する必要があります。

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::error::ApiError;
use super::AppState;
use crate::error::CsvBookError;

/// APIキーを提示するヘッダー
pub const API_KEY_HEADER: &str = "x-api-key";

/// 設定済みのAPIキー
///
/// キーそのものは保持せず、SHA-256ダイジェストで比較します。
#[derive(Clone)]
pub struct ApiKey(Arc<[u8]>);

impl ApiKey {
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Config`: キーが空の場合
    pub fn new(key: &str) -> Result<Self, CsvBookError> {
        if key.trim().is_empty() {
            return Err(CsvBookError::Config("API key must not be empty".to_string()));
        }
        Ok(Self(Arc::from(Sha256::digest(key.as_bytes()).as_slice())))
    }

    /// 提示されたキーが一致するかどうか
    pub fn matches(&self, presented: &str) -> bool {
        let digest = Sha256::digest(presented.as_bytes());
        digest
            .iter()
            .zip(self.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

/// リクエストから提示されたキーを取り出す
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// APIキーを検証するミドルウェア
pub(super) async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let verdict = presented_key(request.headers()).map(|key| state.api_key.matches(key));
    match verdict {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            warn!(path = %request.uri().path(), "rejected request with invalid API key");
            Err(CsvBookError::Unauthorized("invalid API key".to_string()).into())
        }
        None => Err(CsvBookError::Unauthorized("missing API key".to_string()).into()),
    }
}
