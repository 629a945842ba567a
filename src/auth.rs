//! Auth Module
//!
//! アップロード先（Microsoft Graph）へのアクセストークンを取得するモジュール。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::CsvBookError;

/// Microsoft Graphの既定スコープ
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// 既定の認証局
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// 有効期限のこの時間前にトークンを更新する
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// `expires_in`がない場合の有効期間
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// アクセストークンの取得
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 指定スコープのアクセストークンを取得する
    async fn token(&self, scope: &str) -> Result<String, CsvBookError>;
}

/// 固定のトークン
///
/// シークレットストアから読み込んだ長期トークンやテストで使用します。
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _scope: &str) -> Result<String, CsvBookError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2クライアントクレデンシャルフロー
///
/// 取得したトークンはスコープごとに、有効期限の60秒前までキャッシュします。
pub struct ClientCredentials {
    client: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("authority", &self.authority)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    /// 新しいインスタンスを生成（認証局は`login.microsoftonline.com`）
    pub fn new(
        client: reqwest::Client,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 認証局のURLを差し替える
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into().trim_end_matches('/').to_string();
        self
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }

    async fn request_token(&self, scope: &str) -> Result<CachedToken, CsvBookError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        info!(tenant = %self.tenant_id, scope, "requesting access token");
        let response = self
            .client
            .post(self.token_url())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "token request failed");
            return Err(CsvBookError::downstream("token endpoint", status.as_u16(), &body));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|_| CsvBookError::Protocol("token response is not valid JSON".to_string()))?;
        let value = parsed.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            CsvBookError::Protocol("token response has no access_token".to_string())
        })?;

        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        Ok(CachedToken {
            value,
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentials {
    async fn token(&self, scope: &str) -> Result<String, CsvBookError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(scope) {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.request_token(scope).await?;
        let value = fresh.value.clone();
        cache.insert(scope.to_string(), fresh);
        Ok(value)
    }
}
