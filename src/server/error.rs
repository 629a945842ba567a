//! HTTPレスポンスへのエラー変換

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::{CsvBookError, ErrorKind};

/// ハンドラーが返すエラー
///
/// 5xxの場合、詳細はログにのみ出力し、クライアントには汎用的なメッセージを返します。
#[derive(Debug)]
pub struct ApiError(pub CsvBookError);

impl From<CsvBookError> for ApiError {
    fn from(e: CsvBookError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Downstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Protocol | ErrorKind::Config | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.0.kind();
        if kind.is_server_error() {
            error!(error = %self.0, kind = kind.label(), "request failed");
        }

        (
            status,
            Json(json!({
                "error": kind.label(),
                "message": self.0.public_message(),
            })),
        )
            .into_response()
    }
}
