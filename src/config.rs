//! Config Module
//!
//! 環境変数からサービスの設定を読み込むモジュール。
//! 必須の値が欠けている場合は起動時に`CsvBookError::Config`を返します。

use std::str::FromStr;
use std::time::Duration;

use crate::api::Staging;
use crate::error::CsvBookError;
use crate::upload::DEFAULT_CHUNK_SIZE;

/// 既定の待ち受けアドレス
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// 既定の待ち受けポート
pub const DEFAULT_PORT: u16 = 8080;
/// 既定のレポートコンテナ名
pub const DEFAULT_REPORTS_CONTAINER: &str = "reports";
/// 既定の環境名
pub const DEFAULT_ENVIRONMENT: &str = "dev";
/// 既定のHTTPタイムアウト（秒）
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// アプリケーション（サービスプリンシパル）の資格情報
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecretSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSecretSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// SharePointドキュメントライブラリの保存先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSettings {
    pub site_id: String,
    pub drive_id: String,
    pub folder_path: String,
}

/// サービス全体の設定
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// ソースCSVを読み込むストレージアカウントの接続文字列
    pub storage_connection_string: String,
    /// ヘルスチェック以外のルートで要求するAPIキー
    pub api_key: String,
    pub reports_container: String,
    pub key_vault_uri: Option<String>,
    /// 出力先コンテナのSAS付きURLを格納したシークレット
    pub storage_url_secret_name: Option<String>,
    /// SharePointのフォルダURLを格納したシークレット
    pub sharepoint_upload_url_secret_name: Option<String>,
    /// SharePointのアクセストークンを格納したシークレット
    pub sharepoint_token_secret_name: Option<String>,
    pub credentials: Option<ClientSecretSettings>,
    pub drive: Option<DriveSettings>,
    pub environment: String,
    pub http_timeout: Duration,
    /// アップロードセッションのチャンクサイズ（バイト）
    pub upload_chunk_size: u64,
    pub staging: Staging,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("reports_container", &self.reports_container)
            .field("key_vault_uri", &self.key_vault_uri)
            .field("storage_url_secret_name", &self.storage_url_secret_name)
            .field(
                "sharepoint_upload_url_secret_name",
                &self.sharepoint_upload_url_secret_name,
            )
            .field(
                "sharepoint_token_secret_name",
                &self.sharepoint_token_secret_name,
            )
            .field("credentials", &self.credentials)
            .field("drive", &self.drive)
            .field("environment", &self.environment)
            .field("http_timeout", &self.http_timeout)
            .field("upload_chunk_size", &self.upload_chunk_size)
            .field("staging", &self.staging)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// プロセスの環境変数から読み込む
    pub fn from_env() -> Result<Self, CsvBookError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から読み込む
    ///
    /// 空白のみの値は未設定として扱います。
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Config`: 必須の値がない、数値が不正、または組み合わせが不完全な場合
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use std::collections::HashMap;
    /// use csvbook::AppConfig;
    ///
    /// let env: HashMap<&str, &str> = [(
    ///     "AZURE_STORAGE_CONNECTION_STRING",
    ///     "AccountName=dev;AccountKey=a2V5",
    /// )]
    /// .into_iter()
    /// .collect();
    ///
    /// let config = AppConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
    /// assert_eq!(config.port, 8080);
    /// assert_eq!(config.reports_container, "reports");
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CsvBookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let staging = match get("CSVBOOK_STAGING") {
            Some(value) => Staging::parse(&value).ok_or_else(|| {
                CsvBookError::Config(format!(
                    "CSVBOOK_STAGING must be 'memory' or 'tempfile' (got '{}')",
                    value
                ))
            })?,
            None => Staging::default(),
        };

        let credentials = all_or_none(
            &get,
            &["GRAPH_TENANT_ID", "GRAPH_CLIENT_ID", "GRAPH_CLIENT_SECRET"],
        )?
        .map(|mut v| ClientSecretSettings {
            client_secret: v.remove(2),
            client_id: v.remove(1),
            tenant_id: v.remove(0),
        });

        let drive = all_or_none(&get, &["SHAREPOINT_SITE_ID", "SHAREPOINT_DRIVE_ID"])?.map(
            |mut v| DriveSettings {
                drive_id: v.remove(1),
                site_id: v.remove(0),
                folder_path: get("SHAREPOINT_FOLDER_PATH").unwrap_or_default(),
            },
        );

        let config = Self {
            host: get("CSVBOOK_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&get, "CSVBOOK_PORT", DEFAULT_PORT)?,
            storage_connection_string: get("AZURE_STORAGE_CONNECTION_STRING").ok_or_else(
                || CsvBookError::Config("AZURE_STORAGE_CONNECTION_STRING is required".to_string()),
            )?,
            api_key: get("CSVBOOK_API_KEY").ok_or_else(|| {
                CsvBookError::Config("CSVBOOK_API_KEY is required".to_string())
            })?,
            reports_container: get("REPORTS_CONTAINER_NAME")
                .unwrap_or_else(|| DEFAULT_REPORTS_CONTAINER.to_string()),
            key_vault_uri: get("KEY_VAULT_URI"),
            storage_url_secret_name: get("STORAGE_URL_SECRET_NAME"),
            sharepoint_upload_url_secret_name: get("SHAREPOINT_UPLOAD_URL_SECRET_NAME"),
            sharepoint_token_secret_name: get("SHAREPOINT_TOKEN_SECRET_NAME"),
            credentials,
            drive,
            environment: get("ENVIRONMENT_NAME")
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            http_timeout: Duration::from_secs(parse_or(
                &get,
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            upload_chunk_size: parse_or(&get, "UPLOAD_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            staging,
        };
        config.validate()?;
        Ok(config)
    }

    /// 待ち受けアドレス（`host:port`）
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), CsvBookError> {
        if self.http_timeout.is_zero() {
            return Err(CsvBookError::Config(
                "HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.sharepoint_upload_url_secret_name.is_some()
            != self.sharepoint_token_secret_name.is_some()
        {
            return Err(CsvBookError::Config(
                "SHAREPOINT_UPLOAD_URL_SECRET_NAME and SHAREPOINT_TOKEN_SECRET_NAME must be set together"
                    .to_string(),
            ));
        }
        if self.credentials.is_none() {
            if self.key_vault_uri.is_some() {
                return Err(CsvBookError::Config(
                    "KEY_VAULT_URI requires GRAPH_TENANT_ID, GRAPH_CLIENT_ID and GRAPH_CLIENT_SECRET"
                        .to_string(),
                ));
            }
            if self.drive.is_some() {
                return Err(CsvBookError::Config(
                    "SHAREPOINT_SITE_ID requires GRAPH_TENANT_ID, GRAPH_CLIENT_ID and GRAPH_CLIENT_SECRET"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// 関連する値がすべて設定されているか、すべて未設定であることを確認する
fn all_or_none<G>(get: &G, names: &[&str]) -> Result<Option<Vec<String>>, CsvBookError>
where
    G: Fn(&str) -> Option<String>,
{
    let values: Vec<Option<String>> = names.iter().map(|n| get(n)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    let missing: Vec<&str> = names
        .iter()
        .zip(&values)
        .filter(|(_, v)| v.is_none())
        .map(|(n, _)| *n)
        .collect();
    if !missing.is_empty() {
        return Err(CsvBookError::Config(format!(
            "incomplete settings: {} must also be set",
            missing.join(", ")
        )));
    }
    Ok(Some(values.into_iter().flatten().collect()))
}

fn parse_or<G, T>(get: &G, name: &str, default: T) -> Result<T, CsvBookError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(name) {
        Some(value) => value.parse().map_err(|_| {
            CsvBookError::Config(format!("{} has an invalid value: '{}'", name, value))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONNECTION: &str = "DefaultEndpointsProtocol=https;AccountName=dev;AccountKey=a2V5";

    fn lookup(pairs: &[(&str, &str)]) -> Result<AppConfig, CsvBookError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    /// APIキーを設定済みの環境で読み込む
    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, CsvBookError> {
        let mut all = vec![("CSVBOOK_API_KEY", "test-key")];
        all.extend_from_slice(pairs);
        lookup(&all)
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("AZURE_STORAGE_CONNECTION_STRING", CONNECTION)]).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.environment, "dev");
        assert_eq!(config.staging, Staging::Memory);
        assert_eq!(config.http_timeout, Duration::from_secs(300));
        assert_eq!(config.upload_chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.credentials.is_none());
        assert!(config.drive.is_none());
    }

    #[test]
    fn test_connection_string_is_required() {
        let result = load(&[("CSVBOOK_PORT", "9000")]);
        assert!(matches!(result, Err(CsvBookError::Config(msg)) if msg.contains("AZURE_STORAGE")));
    }

    #[test]
    fn test_api_key_is_required() {
        let result = lookup(&[("AZURE_STORAGE_CONNECTION_STRING", CONNECTION)]);
        assert!(matches!(result, Err(CsvBookError::Config(msg)) if msg.contains("CSVBOOK_API_KEY")));

        let config = load(&[("AZURE_STORAGE_CONNECTION_STRING", CONNECTION)]).unwrap();
        assert_eq!(config.api_key, "test-key");
        assert!(!format!("{:?}", config).contains("test-key"));
    }

    #[test]
    fn test_invalid_port() {
        let result = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("CSVBOOK_PORT", "http"),
        ]);
        assert!(matches!(result, Err(CsvBookError::Config(_))));
    }

    #[test]
    fn test_staging_and_overrides() {
        let config = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("CSVBOOK_STAGING", "TempFile"),
            ("ENVIRONMENT_NAME", "prod"),
            ("REPORTS_CONTAINER_NAME", "activity"),
            ("HTTP_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.staging, Staging::TempFile);
        assert_eq!(config.environment, "prod");
        assert_eq!(config.reports_container, "activity");
        assert_eq!(config.http_timeout, Duration::from_secs(30));

        let result = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("CSVBOOK_STAGING", "disk"),
        ]);
        assert!(matches!(result, Err(CsvBookError::Config(_))));
    }

    #[test]
    fn test_graph_settings_must_be_complete() {
        let result = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("GRAPH_TENANT_ID", "t"),
        ]);
        assert!(
            matches!(result, Err(CsvBookError::Config(msg)) if msg.contains("GRAPH_CLIENT_ID, GRAPH_CLIENT_SECRET"))
        );

        let config = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("GRAPH_TENANT_ID", "t"),
            ("GRAPH_CLIENT_ID", "c"),
            ("GRAPH_CLIENT_SECRET", "s"),
            ("SHAREPOINT_SITE_ID", "site"),
            ("SHAREPOINT_DRIVE_ID", "drive"),
            ("SHAREPOINT_FOLDER_PATH", "Reports"),
        ])
        .unwrap();
        let credentials = config.credentials.clone().unwrap();
        assert_eq!(credentials.tenant_id, "t");
        assert_eq!(credentials.client_id, "c");
        assert_eq!(credentials.client_secret, "s");
        let drive = config.drive.clone().unwrap();
        assert_eq!(drive.site_id, "site");
        assert_eq!(drive.drive_id, "drive");
        assert_eq!(drive.folder_path, "Reports");
        assert!(!format!("{:?}", config).contains("AccountKey"));
        assert!(!format!("{:?}", credentials).contains("\"s\""));
    }

    #[test]
    fn test_drive_requires_credentials() {
        let result = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("SHAREPOINT_SITE_ID", "site"),
            ("SHAREPOINT_DRIVE_ID", "drive"),
        ]);
        assert!(matches!(result, Err(CsvBookError::Config(_))));
    }

    #[test]
    fn test_sharepoint_secret_names_are_paired() {
        let result = load(&[
            ("AZURE_STORAGE_CONNECTION_STRING", CONNECTION),
            ("SHAREPOINT_UPLOAD_URL_SECRET_NAME", "sp-url"),
        ]);
        assert!(matches!(result, Err(CsvBookError::Config(_))));
    }
}
