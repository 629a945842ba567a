//! Secrets Module
//!
//! 接続先URLやトークンなどのシークレットを取得するモジュール。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::error::CsvBookError;

/// Key Vault REST APIのバージョン
const KEY_VAULT_API_VERSION: &str = "7.4";

/// Key Vaultのスコープ
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// シークレットの取得
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// 名前を指定してシークレットを取得する
    async fn get(&self, name: &str) -> Result<String, CsvBookError>;
}

/// 環境変数からシークレットを取得する
///
/// シークレット名の`-`を`_`に、英字を大文字に変換した環境変数を参照します
/// （例: `sharepoint-token` → `SHAREPOINT_TOKEN`）。
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets;

impl EnvSecrets {
    /// シークレット名に対応する環境変数名
    pub fn variable_name(name: &str) -> String {
        name.replace('-', "_").to_ascii_uppercase()
    }
}

#[async_trait]
impl SecretStore for EnvSecrets {
    async fn get(&self, name: &str) -> Result<String, CsvBookError> {
        let variable = Self::variable_name(name);
        std::env::var(&variable).map_err(|_| {
            CsvBookError::Config(format!(
                "secret '{}' not found (environment variable {} is not set)",
                name, variable
            ))
        })
    }
}

#[derive(Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

/// Azure Key Vaultからシークレットを取得する
pub struct KeyVaultSecrets {
    client: reqwest::Client,
    vault_uri: String,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for KeyVaultSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultSecrets")
            .field("vault_uri", &self.vault_uri)
            .finish_non_exhaustive()
    }
}

impl KeyVaultSecrets {
    /// 新しいインスタンスを生成
    pub fn new(
        client: reqwest::Client,
        vault_uri: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            vault_uri: vault_uri.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }
}

#[async_trait]
impl SecretStore for KeyVaultSecrets {
    async fn get(&self, name: &str) -> Result<String, CsvBookError> {
        let token = self.tokens.token(KEY_VAULT_SCOPE).await?;
        let url = format!(
            "{}/secrets/{}?api-version={}",
            self.vault_uri, name, KEY_VAULT_API_VERSION
        );

        debug!(secret = name, "fetching secret");
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CsvBookError::Config(format!(
                "secret '{}' does not exist in the key vault",
                name
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CsvBookError::downstream("key vault", status.as_u16(), &body));
        }

        let bundle: SecretBundle = response.json().await.map_err(|_| {
            CsvBookError::Protocol(format!("secret '{}' response is not valid JSON", name))
        })?;
        let value = bundle
            .value
            .ok_or_else(|| CsvBookError::Protocol(format!("secret '{}' has no value", name)))?;

        info!(secret = name, "resolved secret");
        Ok(value)
    }
}
