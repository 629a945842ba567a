//! ルートハンドラー

use std::collections::HashMap;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::error::CsvBookError;
use crate::orchestrator::InstanceStatus;
use crate::pipeline::CombinedWorkbook;
use crate::request::{ConvertRequest, OrchestrationRequest, RequestFields};
use crate::types::{UploadResult, XLSX_CONTENT_TYPE};

type Params = Query<HashMap<String, String>>;

fn convert_request(
    state: &AppState,
    query: HashMap<String, String>,
    body: &[u8],
) -> Result<ConvertRequest, CsvBookError> {
    let fields = RequestFields::from_parts(query, body)?;
    ConvertRequest::from_fields(&fields, &state.default_container)
}

pub(super) async fn health() -> &'static str {
    "OK"
}

/// ワークブックを添付ファイルとして返す
pub(super) async fn merge(
    State(state): State<AppState>,
    Query(query): Params,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = convert_request(&state, query, &body)?;
    let CombinedWorkbook {
        file_name,
        workbook,
    } = state.pipeline.combine(&request.selection).await?;

    let length = workbook.len();
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', "_"));
    let stream = ReaderStream::new(workbook.into_async_reader());

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

pub(super) async fn merge_to_blob(
    State(state): State<AppState>,
    Query(query): Params,
    body: Bytes,
) -> Result<Json<UploadResult>, ApiError> {
    let request = convert_request(&state, query, &body)?;
    Ok(Json(state.pipeline.run_to_blob(&request.selection).await?))
}

pub(super) async fn merge_to_sharepoint(
    State(state): State<AppState>,
    Query(query): Params,
    body: Bytes,
) -> Result<Json<UploadResult>, ApiError> {
    let request = convert_request(&state, query, &body)?;
    Ok(Json(
        state.pipeline.run_to_sharepoint(&request.selection).await?,
    ))
}

/// オーケストレーションを開始し、状態照会先を返す
pub(super) async fn start_activity_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Params,
    body: Bytes,
) -> Result<Response, ApiError> {
    let fields = RequestFields::from_parts(query, &body)?;
    let request = OrchestrationRequest::from_fields(&fields)?;
    let id = state.orchestrator.start(request).await;

    let status_uri = status_query_uri(&headers, id);
    info!(instance = %id, "accepted activity report request");
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, status_uri.clone())],
        Json(json!({
            "id": id,
            "statusQueryGetUri": status_uri,
        })),
    )
        .into_response())
}

pub(super) async fn orchestration_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceStatus>, ApiError> {
    let not_found = || CsvBookError::NotFound(format!("instance {} not found", id));
    let instance = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let status = state
        .orchestrator
        .status(instance)
        .await
        .ok_or_else(not_found)?;
    Ok(Json(status))
}

/// 状態照会のURL（`Host`ヘッダーがない場合は相対パス）
fn status_query_uri(headers: &HeaderMap, id: Uuid) -> String {
    let path = format!("/api/orchestrators/status/{}", id);
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty());
    match host {
        Some(host) => {
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("http");
            format!("{}://{}{}", scheme, host, path)
        }
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_status_query_uri() {
        let id = Uuid::nil();
        let mut headers = HeaderMap::new();
        assert_eq!(
            status_query_uri(&headers, id),
            format!("/api/orchestrators/status/{}", id)
        );

        headers.insert(header::HOST, HeaderValue::from_static("reports.local:8080"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(
            status_query_uri(&headers, id),
            format!("https://reports.local:8080/api/orchestrators/status/{}", id)
        );
    }
}
