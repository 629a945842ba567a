//! Server Module
//!
//! HTTPエンドポイントを提供するモジュール。
//!
//! | ルート | 内容 |
//! |---|---|
//! | `GET /api/health` | ヘルスチェック |
//! | `GET/POST /api/merge` | ワークブックを添付ファイルとして返す |
//! | `GET/POST /api/merge-to-blob` | ワークブックをBlobストレージへ書き込む |
//! | `GET/POST /api/merge-to-sharepoint` | ワークブックをSharePointへアップロードする |
//! | `POST /api/orchestrators/activity-report` | レポート生成を開始する（202） |
//! | `GET /api/orchestrators/status/{id}` | レポート生成の状態を返す |
//!
//! ヘルスチェック以外のルートにはAPIキーが必要です（`auth`モジュール参照）。

mod auth;
mod error;
mod handlers;

pub use auth::{ApiKey, API_KEY_HEADER};
pub use error::ApiError;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::CsvBookError;
use crate::orchestrator::Orchestrator;
use crate::pipeline::ReportPipeline;

/// ハンドラー間で共有する状態
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: Arc<ReportPipeline>,
    pub orchestrator: Arc<Orchestrator>,
    /// コンテナ名が指定されない場合に使用するコンテナ
    pub default_container: String,
    /// ヘルスチェック以外のルートで要求するAPIキー
    pub api_key: ApiKey,
}

impl AppState {
    pub fn new(
        pipeline: Arc<ReportPipeline>,
        orchestrator: Arc<Orchestrator>,
        default_container: impl Into<String>,
        api_key: ApiKey,
    ) -> Self {
        Self {
            pipeline,
            orchestrator,
            default_container: default_container.into(),
            api_key,
        }
    }
}

/// ルーターを構築する
pub fn router(state: AppState) -> Router {
    let protected: Router<AppState> = Router::new()
        .route("/api/merge", get(handlers::merge).post(handlers::merge))
        .route(
            "/api/merge-to-blob",
            get(handlers::merge_to_blob).post(handlers::merge_to_blob),
        )
        .route(
            "/api/merge-to-sharepoint",
            get(handlers::merge_to_sharepoint).post(handlers::merge_to_sharepoint),
        )
        .route(
            "/api/orchestrators/activity-report",
            post(handlers::start_activity_report),
        )
        .route(
            "/api/orchestrators/status/{id}",
            get(handlers::orchestration_status),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/api/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ctrl-Cを受け取るまで待ち受ける
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), CsvBookError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
