//! Orchestrator Module
//!
//! 月次アクティビティレポートのバックグラウンド実行と、その状態の照会を提供するモジュール。
//! 状態はプロセス内にのみ保持されます。終了したインスタンスは保持期間を過ぎるか、
//! 保持数の上限を超えると次の開始時に破棄されます。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::CsvBookError;
use crate::pipeline::ReportPipeline;
use crate::request::OrchestrationRequest;

/// 終了したインスタンスの既定の保持期間
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// 既定の保持数の上限
pub const DEFAULT_MAX_INSTANCES: usize = 10_000;

/// インスタンスの実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuntimeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RuntimeStatus {
    /// 完了または失敗したかどうか
    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeStatus::Completed | RuntimeStatus::Failed)
    }
}

/// インスタンスの状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub id: Uuid,
    pub runtime_status: RuntimeStatus,
    /// 完了時のアップロード先URL
    pub output: Option<String>,
    /// 失敗時のエラーメッセージ（サーバー側の失敗では汎用的な文言）
    pub error: Option<String>,
    /// 失敗時のエラー分類（例: `downstream`）
    pub error_kind: Option<String>,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
}

impl InstanceStatus {
    fn pending(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            runtime_status: RuntimeStatus::Pending,
            output: None,
            error: None,
            error_kind: None,
            created_time: now,
            last_updated_time: now,
        }
    }
}

/// レポート生成のオーケストレーター
///
/// 1インスタンスは「結合」→「アップロード」の2ステップを順に実行します。
#[derive(Debug)]
pub struct Orchestrator {
    pipeline: Arc<ReportPipeline>,
    container: String,
    retention: Duration,
    max_instances: usize,
    statuses: RwLock<HashMap<Uuid, InstanceStatus>>,
}

impl Orchestrator {
    /// # 引数
    ///
    /// * `pipeline` - 変換・配信パイプライン
    /// * `container` - レポートCSVが置かれているコンテナ
    pub fn new(pipeline: Arc<ReportPipeline>, container: impl Into<String>) -> Self {
        Self {
            pipeline,
            container: container.into(),
            retention: DEFAULT_RETENTION,
            max_instances: DEFAULT_MAX_INSTANCES,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// 終了したインスタンスの保持期間を指定する
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// 保持するインスタンス数の上限を指定する
    ///
    /// 実行中のインスタンスは上限を超えても破棄されません。
    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances.max(1);
        self
    }

    /// インスタンスを開始し、そのIDを返す
    ///
    /// 処理はバックグラウンドタスクで実行されます。
    pub async fn start(self: &Arc<Self>, request: OrchestrationRequest) -> Uuid {
        let id = Uuid::new_v4();
        {
            let mut statuses = self.statuses.write().await;
            let evicted = evict(&mut statuses, Utc::now(), self.retention, self.max_instances);
            if evicted > 0 {
                debug!(evicted, remaining = statuses.len(), "evicted finished instances");
            }
            statuses.insert(id, InstanceStatus::pending(id));
        }
        info!(
            instance = %id,
            member_firm = %request.member_firm_id,
            period = %request.reporting_period,
            "orchestration started"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(id, request).await;
        });
        id
    }

    /// インスタンスの状態（未知のIDは`None`）
    pub async fn status(&self, id: Uuid) -> Option<InstanceStatus> {
        self.statuses.read().await.get(&id).cloned()
    }

    async fn run(&self, id: Uuid, request: OrchestrationRequest) {
        self.update(id, RuntimeStatus::Running, None, None).await;

        let selection = request.selection(&self.container);
        let result = match self.pipeline.combine(&selection).await {
            Ok(combined) => self.pipeline.deliver_to_sharepoint(combined).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(uploaded) => {
                info!(instance = %id, url = %uploaded.destination_url, "orchestration completed");
                self.update(
                    id,
                    RuntimeStatus::Completed,
                    Some(uploaded.destination_url),
                    None,
                )
                .await;
            }
            Err(e) => {
                error!(instance = %id, error = %e, kind = e.kind().label(), "orchestration failed");
                self.update(id, RuntimeStatus::Failed, None, Some(&e)).await;
            }
        }
    }

    async fn update(
        &self,
        id: Uuid,
        runtime_status: RuntimeStatus,
        output: Option<String>,
        error: Option<&CsvBookError>,
    ) {
        if let Some(status) = self.statuses.write().await.get_mut(&id) {
            status.runtime_status = runtime_status;
            status.output = output;
            status.error = error.map(CsvBookError::public_message);
            status.error_kind = error.map(|e| e.kind().label().to_string());
            status.last_updated_time = Utc::now();
        }
    }
}

/// 終了したインスタンスを破棄し、破棄した数を返す
///
/// 1. 保持期間を過ぎたものをすべて破棄
/// 2. `max_instances`未満になるまで、最終更新の古い順に破棄
fn evict(
    statuses: &mut HashMap<Uuid, InstanceStatus>,
    now: DateTime<Utc>,
    retention: Duration,
    max_instances: usize,
) -> usize {
    let before = statuses.len();
    statuses.retain(|_, status| {
        let age = (now - status.last_updated_time).to_std().unwrap_or_default();
        !(status.runtime_status.is_terminal() && age > retention)
    });

    if statuses.len() >= max_instances {
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = statuses
            .values()
            .filter(|s| s.runtime_status.is_terminal())
            .map(|s| (s.last_updated_time, s.id))
            .collect();
        finished.sort();
        let excess = statuses.len() + 1 - max_instances;
        for (_, id) in finished.into_iter().take(excess) {
            statuses.remove(&id);
        }
    }

    before - statuses.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkbookBuilder;
    use crate::storage::MemoryBlobStore;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn orchestrator(store: MemoryBlobStore) -> Arc<Orchestrator> {
        let pipeline = ReportPipeline::new(
            Arc::new(store),
            WorkbookBuilder::new().build().unwrap(),
            reqwest::Client::new(),
        );
        Arc::new(Orchestrator::new(Arc::new(pipeline), "reports"))
    }

    async fn wait_for_end(orchestrator: &Orchestrator, id: Uuid) -> InstanceStatus {
        for _ in 0..200 {
            let status = orchestrator.status(id).await.unwrap();
            if matches!(
                status.runtime_status,
                RuntimeStatus::Completed | RuntimeStatus::Failed
            ) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("orchestration did not finish");
    }

    fn request() -> OrchestrationRequest {
        OrchestrationRequest {
            member_firm_id: "MF01".to_string(),
            reporting_period: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let orchestrator = orchestrator(MemoryBlobStore::new());
        assert!(orchestrator.status(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_without_sources() {
        let orchestrator = orchestrator(MemoryBlobStore::new());
        let id = orchestrator.start(request()).await;

        let status = wait_for_end(&orchestrator, id).await;
        assert_eq!(status.runtime_status, RuntimeStatus::Failed);
        assert!(status.error.unwrap().contains("no CSV files"));
        assert_eq!(status.error_kind.as_deref(), Some("not_found"));
        assert!(status.output.is_none());
    }

    #[tokio::test]
    async fn test_failure_when_upload_is_not_configured() {
        let store = MemoryBlobStore::new().with_blob(
            "reports",
            "Reports/MF01/2024/01/31/activity.csv",
            "a,b\n1,2\n",
        );
        let orchestrator = orchestrator(store);
        let id = orchestrator.start(request()).await;

        let status = wait_for_end(&orchestrator, id).await;
        assert_eq!(status.runtime_status, RuntimeStatus::Failed);
        // 設定の詳細は状態照会に含めない
        assert_eq!(status.error.as_deref(), Some("internal server error"));
        assert_eq!(status.error_kind.as_deref(), Some("config"));
    }

    fn finished(runtime_status: RuntimeStatus, age_secs: i64, now: DateTime<Utc>) -> InstanceStatus {
        let mut status = InstanceStatus::pending(Uuid::new_v4());
        status.runtime_status = runtime_status;
        status.last_updated_time = now - chrono::Duration::seconds(age_secs);
        status
    }

    #[test]
    fn test_evict_expired_instances() {
        let now = Utc::now();
        let old = finished(RuntimeStatus::Completed, 120, now);
        let recent = finished(RuntimeStatus::Failed, 10, now);
        let running = finished(RuntimeStatus::Running, 600, now);
        let mut statuses: HashMap<Uuid, InstanceStatus> = [&old, &recent, &running]
            .into_iter()
            .map(|s| (s.id, s.clone()))
            .collect();

        let evicted = evict(&mut statuses, now, Duration::from_secs(60), 100);
        assert_eq!(evicted, 1);
        assert!(!statuses.contains_key(&old.id));
        assert!(statuses.contains_key(&recent.id));
        assert!(statuses.contains_key(&running.id));
    }

    #[test]
    fn test_evict_oldest_above_cap() {
        let now = Utc::now();
        let instances = vec![
            finished(RuntimeStatus::Completed, 30, now),
            finished(RuntimeStatus::Completed, 20, now),
            finished(RuntimeStatus::Running, 40, now),
            finished(RuntimeStatus::Failed, 10, now),
        ];
        let mut statuses: HashMap<Uuid, InstanceStatus> =
            instances.iter().map(|s| (s.id, s.clone())).collect();

        // 新しいインスタンスの分を空けるため、上限3に対して2件まで減らす
        let evicted = evict(&mut statuses, now, DEFAULT_RETENTION, 3);
        assert_eq!(evicted, 2);
        assert!(!statuses.contains_key(&instances[0].id));
        assert!(!statuses.contains_key(&instances[1].id));
        assert!(statuses.contains_key(&instances[2].id));
        assert!(statuses.contains_key(&instances[3].id));
    }

    #[tokio::test]
    async fn test_start_evicts_finished_instances() {
        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::new(ReportPipeline::new(
                    Arc::new(MemoryBlobStore::new()),
                    WorkbookBuilder::new().build().unwrap(),
                    reqwest::Client::new(),
                )),
                "reports",
            )
            .with_max_instances(1),
        );

        let first = orchestrator.start(request()).await;
        wait_for_end(&orchestrator, first).await;
        let second = orchestrator.start(request()).await;

        assert!(orchestrator.status(first).await.is_none());
        assert!(orchestrator.status(second).await.is_some());
    }

    #[test]
    fn test_status_serialization() {
        let id = Uuid::nil();
        let value = serde_json::to_value(InstanceStatus::pending(id)).unwrap();
        assert_eq!(value["runtimeStatus"], "Pending");
        assert_eq!(value["id"], id.to_string());
        assert!(value["output"].is_null());
        assert!(value["errorKind"].is_null());
        assert!(value["createdTime"].is_string());
    }
}
