// 上传队列管理器
//
// 持有进程内唯一的上传队列与当前会话：
// - 同一时间只有一个文件在上传，分片并发只发生在该文件内部
// - 单个文件失败不会中断队列
// - 队列清空后汇总会话并重置计数

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::MediaApi;
use crate::config::AppConfig;
use crate::events::{ProgressReport, SessionSummary, UploadEvent, UploadNotifier};
use crate::filesystem::{LocalStorage, MediaLibrary};

use super::engine::{FileReport, UploadEngine, UploadObserver};
use super::error::UploadError;
use super::item::{UploadItem, UploadItemStatus, UploadOutcome};
use super::progress::ProgressSnapshot;
use super::retention::RetentionPolicy;
use super::session::UploadSession;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 队列状态（同一把锁保护）
struct QueueState {
    queue: VecDeque<UploadItem>,
    in_flight: Option<UploadItem>,
    draining: bool,
    session: UploadSession,
    /// 当前批次使用的取消令牌，`cancel_all` 后替换为新令牌
    cancel_token: CancellationToken,
}

impl QueueState {
    fn contains(&self, source_uri: &str) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|item| item.source_uri == source_uri)
            || self.queue.iter().any(|item| item.source_uri == source_uri)
    }
}

struct ManagerInner {
    engine: UploadEngine,
    retention: RetentionPolicy,
    notifier: Arc<dyn UploadNotifier>,
    state: Mutex<QueueState>,
    event_tx: broadcast::Sender<UploadEvent>,
    idle_tx: watch::Sender<bool>,
    summary_delay: Duration,
}

impl ManagerInner {
    fn publish_event(&self, event: UploadEvent) {
        debug!("发布上传事件: {}", event.event_type_name());
        // 没有订阅者时发送失败，忽略
        let _ = self.event_tx.send(event);
    }
}

/// 队列快照
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub queued: usize,
    pub in_flight: Option<String>,
    pub total_items: usize,
    pub completed_items: usize,
    pub summary: SessionSummary,
    pub draining: bool,
}

/// 上传队列管理器
///
/// `enqueue` 立即返回，结果通过通知接口和事件订阅获得
#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<ManagerInner>,
}

impl UploadManager {
    pub fn new(
        engine: UploadEngine,
        retention: RetentionPolicy,
        notifier: Arc<dyn UploadNotifier>,
        summary_delay: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (idle_tx, _) = watch::channel(true);

        Self {
            inner: Arc::new(ManagerInner {
                engine,
                retention,
                notifier,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    in_flight: None,
                    draining: false,
                    session: UploadSession::new(),
                    cancel_token: CancellationToken::new(),
                }),
                event_tx,
                idle_tx,
                summary_delay,
            }),
        }
    }

    /// 根据配置组装管理器
    pub fn from_config(
        config: &AppConfig,
        api: Arc<dyn MediaApi>,
        storage: Arc<dyn LocalStorage>,
        library: Arc<dyn MediaLibrary>,
        notifier: Arc<dyn UploadNotifier>,
    ) -> Self {
        let engine = UploadEngine::from_config(&config.upload, storage.clone(), api);
        let retention = RetentionPolicy::new(storage, library, &config.retention);

        info!(
            "初始化上传管理器: 分片大小={}MB, 单次上传上限={}MB, 并发分片={}, 原始文件删除策略={:?}",
            config.upload.chunk_size_mb,
            config.upload.single_shot_limit_mb,
            config.upload.max_concurrent_chunks,
            config.retention.source_deletion
        );

        Self::new(engine, retention, notifier, config.upload.summary_delay())
    }

    /// 追加条目，返回实际入队的数量
    ///
    /// 已在队列中或正在上传的同一 URI 会被跳过；队列正在处理时扩大当前会话
    pub fn enqueue(&self, items: Vec<UploadItem>) -> usize {
        let (queued_names, total, start_drain) = {
            let mut state = self.inner.state.lock();

            let mut queued_names = Vec::new();
            for item in items {
                if state.contains(&item.source_uri) {
                    debug!("跳过重复入队: {}", item.source_uri);
                    continue;
                }
                queued_names.push(item.display_name.clone());
                state.queue.push_back(item);
            }

            let added = queued_names.len();
            if added == 0 {
                return 0;
            }

            state.session.extend(added);
            let start_drain = !state.draining;
            if start_drain {
                state.draining = true;
                self.inner.idle_tx.send_replace(false);
            }
            (queued_names, state.session.total_items(), start_drain)
        };

        let added = queued_names.len();
        info!("已入队 {} 个文件，本次会话共 {} 个", added, total);
        self.inner.publish_event(UploadEvent::Enqueued {
            added,
            total_files: total,
        });
        for file_name in queued_names {
            self.inner.publish_event(UploadEvent::StatusChanged {
                file_name,
                status: UploadItemStatus::Queued,
            });
        }

        if start_drain {
            tokio::spawn(drain_queue(self.inner.clone()));
        }

        added
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state.lock();
        QueueSnapshot {
            queued: state.queue.len(),
            in_flight: state.in_flight.as_ref().map(|i| i.display_name.clone()),
            total_items: state.session.total_items(),
            completed_items: state.session.completed_items(),
            summary: state.session.summary(),
            draining: state.draining,
        }
    }

    /// 等待队列清空且会话汇总完成
    pub async fn wait_until_idle(&self) {
        let mut idle_rx = self.inner.idle_tx.subscribe();
        // 发送端由 inner 持有，不会提前关闭
        let _ = idle_rx.wait_for(|idle| *idle).await;
    }

    /// 取消全部上传
    ///
    /// 正在上传的文件在下一个检查点停止；排队中的文件直接记为失败
    pub fn cancel_all(&self) -> usize {
        let (token, cancelled) = {
            let mut state = self.inner.state.lock();
            let token = std::mem::replace(&mut state.cancel_token, CancellationToken::new());
            let cancelled: Vec<UploadItem> = state.queue.drain(..).collect();
            for item in &cancelled {
                state
                    .session
                    .record(UploadOutcome::failed(item.display_name.clone(), UploadError::Cancelled));
            }
            (token, cancelled)
        };

        token.cancel();
        warn!("已取消上传: 排队中 {} 个", cancelled.len());

        for item in &cancelled {
            self.inner.publish_event(UploadEvent::FileFinished {
                file_name: item.display_name.clone(),
                outcome: "failed".to_string(),
                error: Some(UploadError::Cancelled.to_string()),
            });
        }

        cancelled.len()
    }
}

/// 把单文件事件转发给通知接口和订阅者
struct ManagerObserver {
    inner: Arc<ManagerInner>,
}

impl UploadObserver for ManagerObserver {
    fn on_status(&self, item: &UploadItem, status: UploadItemStatus) {
        self.inner.publish_event(UploadEvent::StatusChanged {
            file_name: item.display_name.clone(),
            status,
        });
    }

    fn on_progress(&self, item: &UploadItem, snapshot: &ProgressSnapshot) {
        let (total_files, completed_files) = {
            let state = self.inner.state.lock();
            (state.session.total_items(), state.session.completed_items())
        };

        let report = ProgressReport {
            total_files,
            completed_files,
            current_file: Some(item.display_name.clone()),
            percent: snapshot.percent,
            eta_secs: snapshot.eta.map(|eta| eta.as_secs()),
            elapsed_ms: snapshot.elapsed.as_millis() as u64,
        };

        self.inner.notifier.report_progress(&report);
        self.inner.publish_event(UploadEvent::Progress(report));
    }
}

/// 顺序处理队列直到清空
async fn drain_queue(inner: Arc<ManagerInner>) {
    loop {
        let next = {
            let mut state = inner.state.lock();
            match state.queue.pop_front() {
                Some(item) => {
                    state.in_flight = Some(item.clone());
                    Some((item, state.cancel_token.clone()))
                }
                None => None,
            }
        };

        match next {
            Some((item, cancel_token)) => process_item(&inner, item, cancel_token).await,
            None => {
                // 稍等片刻，期间入队的文件仍属于本次会话
                if !inner.summary_delay.is_zero() {
                    tokio::time::sleep(inner.summary_delay).await;
                }

                let session = {
                    let mut state = inner.state.lock();
                    if !state.queue.is_empty() {
                        continue;
                    }
                    state.draining = false;
                    std::mem::take(&mut state.session)
                };

                finish_session(&inner, session).await;
                break;
            }
        }
    }
}

async fn process_item(inner: &Arc<ManagerInner>, item: UploadItem, cancel_token: CancellationToken) {
    let observer: Arc<dyn UploadObserver> = Arc::new(ManagerObserver {
        inner: inner.clone(),
    });

    // 在独立任务中执行，panic 只影响当前文件
    let task_inner = inner.clone();
    let task_item = item.clone();
    let handle = tokio::spawn(async move {
        task_inner
            .engine
            .upload(&task_item, observer, cancel_token)
            .await
    });

    let report = match handle.await {
        Ok(report) => report,
        Err(e) => {
            error!("上传任务异常退出: name={}, 错误: {}", item.display_name, e);
            FileReport::failed(&item, &UploadError::Internal(e.to_string()))
        }
    };

    let deferred = inner.retention.apply(&item, &report).await;

    {
        let mut state = inner.state.lock();
        if let Some(uri) = deferred {
            state.session.defer_deletion(uri);
        }
        state.session.record(report.outcome.clone());
        state.in_flight = None;
    }

    inner.publish_event(UploadEvent::FileFinished {
        file_name: item.display_name.clone(),
        outcome: report.outcome.label().to_string(),
        error: report.outcome.error().map(str::to_string),
    });
}

async fn finish_session(inner: &Arc<ManagerInner>, mut session: UploadSession) {
    if session.has_activity() {
        inner.retention.flush_deferred(session.take_deferred()).await;

        let summary = session.summary();
        info!(
            "上传会话结束: 共 {} 个, 成功 {} 个, 重复 {} 个, 失败 {} 个",
            session.total_items(),
            summary.succeeded,
            summary.duplicate,
            summary.failed
        );
        inner.notifier.report_summary(&summary);
        inner.publish_event(UploadEvent::SessionCompleted(summary));
    }

    // 期间若已有新的队列处理开始，保持忙碌状态
    let state = inner.state.lock();
    if !state.draining {
        inner.idle_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionConfig, SourceDeletionPolicy};
    use crate::uploader::pool::PoolConfig;
    use crate::uploader::strategy::StrategySelector;
    use crate::uploader::test_support::{MockApi, MockLibrary, MockStorage, RecordingNotifier};

    const MB: u64 = 1024 * 1024;

    struct Harness {
        manager: UploadManager,
        storage: Arc<MockStorage>,
        api: Arc<MockApi>,
        library: Arc<MockLibrary>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(source_deletion: SourceDeletionPolicy) -> Harness {
        let storage = Arc::new(MockStorage::new());
        let api = Arc::new(MockApi::new());
        let library = Arc::new(MockLibrary::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let engine = UploadEngine::new(
            storage.clone(),
            api.clone(),
            StrategySelector::default(),
            5 * MB,
            PoolConfig {
                max_concurrent: 3,
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                progress_interval: Duration::ZERO,
            },
        );
        let retention = RetentionPolicy::new(
            storage.clone(),
            library.clone(),
            &RetentionConfig {
                source_deletion,
                delete_temp_copies: true,
            },
        );
        let manager = UploadManager::new(engine, retention, notifier.clone(), Duration::ZERO);

        Harness {
            manager,
            storage,
            api,
            library,
            notifier,
        }
    }

    fn photo(h: &Harness, name: &str, size: u64) -> UploadItem {
        let uri = format!("file:///dcim/{}", name);
        h.storage.add_file(&uri, size);
        UploadItem::new(uri, Some(name.to_string()), "image/jpeg")
    }

    fn video(h: &Harness, name: &str, size: u64) -> UploadItem {
        let uri = format!("file:///dcim/{}", name);
        h.storage.add_file(&uri, size);
        UploadItem::new(uri, Some(name.to_string()), "video/mp4")
    }

    #[tokio::test]
    async fn test_single_photo_session() {
        let h = harness(SourceDeletionPolicy::Keep);
        let item = photo(&h, "a.jpg", 10 * MB);

        assert_eq!(h.manager.enqueue(vec![item]), 1);
        h.manager.wait_until_idle().await;

        assert_eq!(h.api.single_calls(), vec!["a.jpg".to_string()]);
        assert_eq!(
            *h.notifier.summaries.lock(),
            vec![SessionSummary {
                succeeded: 1,
                duplicate: 0,
                failed: 0
            }]
        );

        let progress = h.notifier.progress.lock();
        assert!(!progress.is_empty());
        assert_eq!(progress.last().map(|p| p.percent), Some(100.0));
        assert_eq!(progress[0].total_files, 1);

        // 会话结束后计数重置
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.total_items, 0);
        assert_eq!(snapshot.completed_items, 0);
        assert!(!snapshot.draining);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_queue() {
        let h = harness(SourceDeletionPolicy::Keep);
        h.api.fail_chunk(42, 3);
        let clip = video(&h, "clip.mp4", 500 * MB);
        let next = photo(&h, "b.jpg", MB);

        h.manager.enqueue(vec![clip, next]);
        h.manager.wait_until_idle().await;

        assert_eq!(h.api.chunk_calls(42), 3);
        assert!(h.api.complete_calls().is_empty());
        assert_eq!(h.api.single_calls(), vec!["b.jpg".to_string()]);
        assert_eq!(
            *h.notifier.summaries.lock(),
            vec![SessionSummary {
                succeeded: 1,
                duplicate: 0,
                failed: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_session_invariants_after_drain() {
        let h = harness(SourceDeletionPolicy::Keep);
        h.api.set_complete_status(crate::api::ServerStatus::Duplicate);
        let items = vec![
            photo(&h, "a.jpg", MB),
            video(&h, "b.mp4", 11 * MB),
            UploadItem::new("file:///dcim/missing.jpg", Some("missing.jpg".into()), "image/jpeg"),
        ];
        let mut events = h.manager.subscribe();

        h.manager.enqueue(items);
        h.manager.wait_until_idle().await;

        let mut finished = 0;
        let mut completed = None;
        while let Ok(event) = events.try_recv() {
            match event {
                UploadEvent::FileFinished { .. } => finished += 1,
                UploadEvent::SessionCompleted(summary) => completed = Some(summary),
                _ => {}
            }
        }

        let summary = completed.unwrap();
        assert_eq!(finished, 3);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.duplicate, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_enqueue_publishes_queued_status() {
        let h = harness(SourceDeletionPolicy::Keep);
        let mut events = h.manager.subscribe();

        h.manager
            .enqueue(vec![photo(&h, "a.jpg", MB), photo(&h, "b.jpg", MB)]);
        h.manager.wait_until_idle().await;

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let UploadEvent::StatusChanged { file_name, status } = event {
                statuses.push((file_name, status));
            }
        }

        // 两个文件都先发布 Queued，之后才开始处理
        assert_eq!(
            statuses[..2],
            [
                ("a.jpg".to_string(), UploadItemStatus::Queued),
                ("b.jpg".to_string(), UploadItemStatus::Queued),
            ]
        );
        assert_eq!(
            statuses
                .iter()
                .filter(|(_, status)| *status == UploadItemStatus::Queued)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_enqueue_mid_drain_extends_session() {
        let h = harness(SourceDeletionPolicy::Keep);
        let gate = h.api.gate_single_uploads();
        let first = photo(&h, "a.jpg", MB);
        let second = photo(&h, "b.jpg", MB);
        let third = photo(&h, "c.jpg", MB);

        h.manager.enqueue(vec![first, second]);

        // 放行第一个文件并等它完成
        gate.add_permits(1);
        while h.manager.snapshot().completed_items < 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        h.manager.enqueue(vec![third]);
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.total_items, 3);
        assert_eq!(snapshot.completed_items, 1);

        gate.add_permits(2);
        h.manager.wait_until_idle().await;

        assert_eq!(h.notifier.summaries.lock().len(), 1);
        assert_eq!(h.notifier.summaries.lock()[0].succeeded, 3);
        assert_eq!(
            h.api.single_calls(),
            vec!["a.jpg".to_string(), "b.jpg".to_string(), "c.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_ignored() {
        let h = harness(SourceDeletionPolicy::Keep);
        let gate = h.api.gate_single_uploads();
        let item = photo(&h, "a.jpg", MB);

        assert_eq!(h.manager.enqueue(vec![item.clone()]), 1);
        assert_eq!(h.manager.enqueue(vec![item.clone(), item]), 0);
        assert_eq!(h.manager.snapshot().total_items, 1);

        gate.add_permits(1);
        h.manager.wait_until_idle().await;
        assert_eq!(h.api.single_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_deletion_batched_at_session_end() {
        let h = harness(SourceDeletionPolicy::Deferred);
        h.api.fail_single_for("bad.jpg");
        let items = vec![
            photo(&h, "a.jpg", MB),
            photo(&h, "bad.jpg", MB),
            photo(&h, "c.jpg", MB),
        ];

        h.manager.enqueue(items);
        h.manager.wait_until_idle().await;

        assert_eq!(
            h.library.batches(),
            vec![vec![
                "file:///dcim/a.jpg".to_string(),
                "file:///dcim/c.jpg".to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn test_cancel_all_fails_remaining_items() {
        let h = harness(SourceDeletionPolicy::Keep);
        let gate = h.api.gate_single_uploads();
        let items = vec![
            photo(&h, "a.jpg", MB),
            photo(&h, "b.jpg", MB),
            photo(&h, "c.jpg", MB),
        ];

        h.manager.enqueue(items);
        while h.api.single_calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(h.manager.cancel_all(), 2);
        gate.add_permits(1);
        h.manager.wait_until_idle().await;

        let summaries = h.notifier.summaries.lock();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].failed, 2);
        assert_eq!(summaries[0].total(), 3);
        assert_eq!(h.api.single_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_manager_reusable_after_session() {
        let h = harness(SourceDeletionPolicy::Keep);

        h.manager.enqueue(vec![photo(&h, "a.jpg", MB)]);
        h.manager.wait_until_idle().await;
        h.manager.enqueue(vec![photo(&h, "b.jpg", MB)]);
        h.manager.wait_until_idle().await;

        let summaries = h.notifier.summaries.lock();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.total() == 1));
    }

    #[tokio::test]
    async fn test_empty_enqueue_is_noop() {
        let h = harness(SourceDeletionPolicy::Keep);
        assert_eq!(h.manager.enqueue(Vec::new()), 0);
        h.manager.wait_until_idle().await;
        assert!(h.notifier.summaries.lock().is_empty());
    }
}
