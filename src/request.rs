//! Request Module
//!
//! HTTPリクエスト（クエリパラメータ・JSON本文）から正規化されたリクエストを組み立てるモジュール。
//!
//! 各フィールドは次の固定の優先順位で取り出します。
//!
//! 1. クエリパラメータ
//! 2. JSON本文のフィールド（キーの大文字小文字を区別しない）
//! 3. 代替フィールド名（同じく クエリ → JSON本文 の順）
//!
//! 空文字列・空白のみの値は未指定として扱います。

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::error::CsvBookError;
use crate::selection::SourceSelection;

/// フィールドと代替名の組
pub mod keys {
    pub const CLIENT_NAME: &[&str] = &["clientName"];
    pub const DATE: &[&str] = &["date", "reportingPeriod"];
    pub const CONTAINER: &[&str] = &["containerName", "container"];
    pub const FOLDER: &[&str] = &["folderPath", "folder"];
    pub const BLOB_URL: &[&str] = &["blobUrl"];
    pub const MEMBER_FIRM: &[&str] = &["memberFirmId"];
    pub const REPORTING_PERIOD: &[&str] = &["reportingPeriod", "date"];
}

/// リクエストの生フィールド
#[derive(Debug, Clone, Default)]
pub struct RequestFields {
    query: HashMap<String, String>,
    body: Map<String, Value>,
}

impl RequestFields {
    /// クエリパラメータとJSON本文から生成する
    ///
    /// 本文がオブジェクト以外の場合は無視します。
    pub fn new(query: HashMap<String, String>, body: Option<Value>) -> Self {
        let body = match body {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self { query, body }
    }

    /// クエリパラメータと本文のバイト列から生成する
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Validation`: 本文が空でなく、JSONとして解析できない場合
    pub fn from_parts(query: HashMap<String, String>, body: &[u8]) -> Result<Self, CsvBookError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(query, None));
        }
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            CsvBookError::Validation(format!("request body is not valid JSON: {}", e))
        })?;
        Ok(Self::new(query, Some(value)))
    }

    /// フィールドの値を優先順位に従って取り出す
    pub fn get(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| self.from_query(name).or_else(|| self.from_body(name)))
    }

    fn from_query(&self, name: &str) -> Option<String> {
        self.query.get(name).and_then(|v| non_blank(v))
    }

    fn from_body(&self, name: &str) -> Option<String> {
        self.body
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| match value {
                Value::String(s) => non_blank(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// 日付を解析する（`YYYY-MM-DD`、またはRFC 3339日時の日付部分）
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, CsvBookError> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.date_naive());
    }
    Err(CsvBookError::Validation(format!(
        "{} must be a date in YYYY-MM-DD format (got '{}')",
        field, value
    )))
}

/// 変換リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    /// ソース選択
    pub selection: SourceSelection,
}

impl ConvertRequest {
    /// フィールドから変換リクエストを組み立てる
    ///
    /// 選択の優先順位:
    ///
    /// 1. `blobUrl`
    /// 2. 日付あり: `memberFirmId`（なければ`clientName`）と日付
    /// 3. `clientName`
    /// 4. `folderPath`
    ///
    /// コンテナ名が指定されない場合は`default_container`を使用します。
    pub fn from_fields(
        fields: &RequestFields,
        default_container: &str,
    ) -> Result<Self, CsvBookError> {
        if let Some(url) = fields.get(keys::BLOB_URL) {
            return Ok(Self {
                selection: SourceSelection::BlobUrl { url },
            });
        }

        let container = fields
            .get(keys::CONTAINER)
            .unwrap_or_else(|| default_container.to_string());
        if container.is_empty() {
            return Err(CsvBookError::Validation(
                "containerName is required".to_string(),
            ));
        }

        let client_name = fields.get(keys::CLIENT_NAME);

        if let Some(raw_date) = fields.get(keys::DATE) {
            let date = parse_date("date", &raw_date)?;
            let member_firm_id = fields
                .get(keys::MEMBER_FIRM)
                .or(client_name)
                .ok_or_else(|| {
                    CsvBookError::Validation(
                        "memberFirmId or clientName is required with date".to_string(),
                    )
                })?;
            return Ok(Self {
                selection: SourceSelection::MemberFirm {
                    container,
                    member_firm_id,
                    date,
                },
            });
        }

        if let Some(client_name) = client_name {
            return Ok(Self {
                selection: SourceSelection::Client {
                    container,
                    client_name,
                },
            });
        }

        if let Some(folder) = fields.get(keys::FOLDER) {
            let folder = folder.trim_matches('/').to_string();
            if !folder.is_empty() {
                return Ok(Self {
                    selection: SourceSelection::Folder { container, folder },
                });
            }
        }

        Err(CsvBookError::Validation(
            "one of blobUrl, folderPath, clientName or memberFirmId with date is required"
                .to_string(),
        ))
    }
}

/// オーケストレーション開始リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationRequest {
    /// メンバーファームID
    pub member_firm_id: String,
    /// 対象日
    pub reporting_period: NaiveDate,
}

impl OrchestrationRequest {
    /// フィールドからオーケストレーション開始リクエストを組み立てる
    pub fn from_fields(fields: &RequestFields) -> Result<Self, CsvBookError> {
        let member_firm_id = fields
            .get(keys::MEMBER_FIRM)
            .ok_or_else(|| CsvBookError::Validation("memberFirmId is required".to_string()))?;
        let raw = fields
            .get(keys::REPORTING_PERIOD)
            .ok_or_else(|| CsvBookError::Validation("reportingPeriod is required".to_string()))?;
        let reporting_period = parse_date("reportingPeriod", &raw)?;
        Ok(Self {
            member_firm_id,
            reporting_period,
        })
    }

    /// 対応するソース選択
    pub fn selection(&self, container: &str) -> SourceSelection {
        SourceSelection::MemberFirm {
            container: container.to_string(),
            member_firm_id: self.member_firm_id.clone(),
            date: self.reporting_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_query_wins_over_body() {
        let fields = RequestFields::new(
            query(&[("folderPath", "from-query")]),
            Some(json!({"folderPath": "from-body"})),
        );
        assert_eq!(fields.get(keys::FOLDER).unwrap(), "from-query");
    }

    #[test]
    fn test_body_keys_are_case_insensitive() {
        let fields = RequestFields::new(HashMap::new(), Some(json!({"FOLDERPATH": "x"})));
        assert_eq!(fields.get(keys::FOLDER).unwrap(), "x");
    }

    #[test]
    fn test_primary_name_wins_over_alternate() {
        let fields = RequestFields::new(
            query(&[("container", "alt")]),
            Some(json!({"containerName": "primary"})),
        );
        assert_eq!(fields.get(keys::CONTAINER).unwrap(), "primary");
    }

    #[test]
    fn test_blank_values_are_missing() {
        let fields = RequestFields::new(query(&[("clientName", "  ")]), None);
        assert_eq!(fields.get(keys::CLIENT_NAME), None);
    }

    #[test]
    fn test_from_parts_rejects_invalid_json() {
        let result = RequestFields::from_parts(HashMap::new(), b"{not json");
        assert!(matches!(result, Err(CsvBookError::Validation(_))));
        assert!(RequestFields::from_parts(HashMap::new(), b"  ").is_ok());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            parse_date("date", "2024-03-05").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert_eq!(
            parse_date("date", "2024-03-05T10:00:00+09:00").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert!(parse_date("date", "05/03/2024").is_err());
        assert!(parse_date("date", "2024-02-30").is_err());
    }

    #[test]
    fn test_convert_request_folder_uses_default_container() {
        let fields = RequestFields::new(query(&[("folderPath", "/2024/march/")]), None);
        let request = ConvertRequest::from_fields(&fields, "reports").unwrap();
        assert_eq!(
            request.selection,
            SourceSelection::Folder {
                container: "reports".to_string(),
                folder: "2024/march".to_string()
            }
        );
    }

    #[test]
    fn test_convert_request_client_with_date_is_member_firm() {
        let fields = RequestFields::new(
            HashMap::new(),
            Some(json!({"clientName": "MF01", "reportingPeriod": "2024-01-09"})),
        );
        let request = ConvertRequest::from_fields(&fields, "reports").unwrap();
        assert!(matches!(
            request.selection,
            SourceSelection::MemberFirm { ref member_firm_id, .. } if member_firm_id == "MF01"
        ));
    }

    #[test]
    fn test_convert_request_blob_url_has_priority() {
        let fields = RequestFields::new(
            query(&[("blobUrl", "https://x/c/a.csv"), ("folderPath", "f")]),
            None,
        );
        let request = ConvertRequest::from_fields(&fields, "reports").unwrap();
        assert!(matches!(request.selection, SourceSelection::BlobUrl { .. }));
    }

    #[test]
    fn test_convert_request_invalid_date() {
        let fields = RequestFields::new(query(&[("clientName", "a"), ("date", "nope")]), None);
        match ConvertRequest::from_fields(&fields, "reports") {
            Err(CsvBookError::Validation(msg)) => assert!(msg.contains("date")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_request_missing_everything() {
        let fields = RequestFields::default();
        assert!(matches!(
            ConvertRequest::from_fields(&fields, "reports"),
            Err(CsvBookError::Validation(_))
        ));
    }

    #[test]
    fn test_orchestration_request() {
        let fields = RequestFields::new(
            HashMap::new(),
            Some(json!({"memberFirmId": "MF01", "reportingPeriod": "2024-01-09"})),
        );
        let request = OrchestrationRequest::from_fields(&fields).unwrap();
        assert_eq!(request.member_firm_id, "MF01");
        assert_eq!(
            request.selection("reports").prefix().unwrap(),
            "Reports/MF01/2024/01/09/"
        );
    }

    #[test]
    fn test_orchestration_request_requires_period() {
        let fields = RequestFields::new(HashMap::new(), Some(json!({"memberFirmId": "MF01"})));
        match OrchestrationRequest::from_fields(&fields) {
            Err(CsvBookError::Validation(msg)) => assert!(msg.contains("reportingPeriod")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }
}
