// 单文件上传引擎
//
// 解析源文件 → 选择策略 → 单次上传 或 分片上传 + 合并

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{CompleteUploadRequest, MediaApi, ServerStatus, SingleShotFile};
use crate::config::UploadConfig;
use crate::filesystem::LocalStorage;

use super::chunk::UploadPlan;
use super::error::UploadError;
use super::item::{UploadItem, UploadItemStatus, UploadOutcome};
use super::pool::{ChunkWorkerPool, PoolConfig, ProgressCallback};
use super::progress::{ProgressSnapshot, ProgressTracker};
use super::strategy::{StrategySelector, UploadStrategy};

/// 未知 MIME 类型时使用的默认值
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 单文件状态与进度观察者
pub trait UploadObserver: Send + Sync {
    fn on_status(&self, item: &UploadItem, status: UploadItemStatus);

    fn on_progress(&self, item: &UploadItem, snapshot: &ProgressSnapshot);
}

/// 单个文件的处理结果
#[derive(Debug, Clone)]
pub struct FileReport {
    pub outcome: UploadOutcome,
    /// 未能解析时为 None
    pub strategy: Option<UploadStrategy>,
    /// 引擎为读取源文件而暂存的副本
    pub staged_copy: Option<PathBuf>,
}

impl FileReport {
    pub fn failed(item: &UploadItem, error: &UploadError) -> Self {
        Self {
            outcome: UploadOutcome::failed(item.display_name.clone(), error),
            strategy: None,
            staged_copy: None,
        }
    }
}

/// 解析后的源文件
struct ResolvedSource {
    path: PathBuf,
    size: u64,
    staged_copy: Option<PathBuf>,
}

/// 上传引擎
///
/// 负责单个文件从解析到合并的完整流程，不做条目级重试
pub struct UploadEngine {
    storage: Arc<dyn LocalStorage>,
    api: Arc<dyn MediaApi>,
    selector: StrategySelector,
    chunk_size: u64,
    pool_config: PoolConfig,
}

impl UploadEngine {
    pub fn new(
        storage: Arc<dyn LocalStorage>,
        api: Arc<dyn MediaApi>,
        selector: StrategySelector,
        chunk_size: u64,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            storage,
            api,
            selector,
            chunk_size: chunk_size.max(1),
            pool_config,
        }
    }

    pub fn from_config(
        config: &UploadConfig,
        storage: Arc<dyn LocalStorage>,
        api: Arc<dyn MediaApi>,
    ) -> Self {
        Self::new(
            storage,
            api,
            StrategySelector::from_config(config),
            config.chunk_size_bytes(),
            PoolConfig::from_config(config),
        )
    }

    /// 上传单个文件
    ///
    /// 所有错误都转换为 Failed 结果，不向上传播
    pub async fn upload(
        &self,
        item: &UploadItem,
        observer: Arc<dyn UploadObserver>,
        cancel_token: CancellationToken,
    ) -> FileReport {
        info!(
            "开始上传: name={}, uri={}, mime={}",
            item.display_name, item.source_uri, item.mime_type
        );

        observer.on_status(item, UploadItemStatus::Resolving);
        let source = match self.resolve(item).await {
            Ok(source) => source,
            Err(e) => {
                error!("解析源文件失败: {}", e);
                observer.on_status(item, UploadItemStatus::Failed);
                return FileReport::failed(item, &e);
            }
        };

        let strategy = self.selector.select(item, source.size);
        info!(
            "上传策略: name={}, size={}, strategy={:?}",
            item.display_name, source.size, strategy
        );

        let result = match strategy {
            UploadStrategy::SingleShot => {
                self.upload_single_shot(item, &source, &observer, &cancel_token)
                    .await
            }
            UploadStrategy::Chunked => {
                self.upload_chunked(item, &source, &observer, &cancel_token)
                    .await
            }
        };

        let outcome = match result {
            Ok(status) => UploadOutcome::from_server_status(&item.display_name, status),
            Err(e) => {
                error!("上传失败: name={}, 错误: {}", item.display_name, e);
                UploadOutcome::failed(item.display_name.clone(), &e)
            }
        };

        match &outcome {
            UploadOutcome::Failed { error, .. } => {
                warn!("文件上传失败: name={}, 原因: {}", item.display_name, error)
            }
            other => info!("文件上传完成: name={}, 结果={}", item.display_name, other.label()),
        }
        observer.on_status(item, outcome.status());

        FileReport {
            outcome,
            strategy: Some(strategy),
            staged_copy: source.staged_copy,
        }
    }

    /// 解析源文件路径与大小，无法直接读取时暂存副本
    async fn resolve(&self, item: &UploadItem) -> Result<ResolvedSource, UploadError> {
        let size_error = |source: anyhow::Error| UploadError::SizeResolution {
            uri: item.source_uri.clone(),
            source,
        };

        let stat = self
            .storage
            .stat_file(&item.source_uri)
            .await
            .map_err(size_error)?;

        if let Some(hint) = item.size_bytes {
            if hint != stat.size {
                warn!(
                    "入队时的大小与实际不一致: name={}, 入队={}, 实际={}",
                    item.display_name, hint, stat.size
                );
            }
        }

        match stat.path {
            Some(path) => Ok(ResolvedSource {
                path,
                size: stat.size,
                staged_copy: None,
            }),
            None => {
                let copy = self
                    .storage
                    .copy_to_temp(&item.source_uri)
                    .await
                    .map_err(size_error)?;
                Ok(ResolvedSource {
                    path: copy.clone(),
                    size: stat.size,
                    staged_copy: Some(copy),
                })
            }
        }
    }

    async fn upload_single_shot(
        &self,
        item: &UploadItem,
        source: &ResolvedSource,
        observer: &Arc<dyn UploadObserver>,
        cancel_token: &CancellationToken,
    ) -> Result<ServerStatus, UploadError> {
        if cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        observer.on_status(item, UploadItemStatus::Uploading);

        let file = SingleShotFile {
            path: source.path.clone(),
            file_name: item.display_name.clone(),
            mime_type: mime_or_default(&item.mime_type),
            size: source.size,
        };

        let tracker = ProgressTracker::new(source.size, 1, self.pool_config.progress_interval);
        let report = |snapshot: &ProgressSnapshot| {
            tracker.report(snapshot, |s| observer.on_progress(item, s));
        };

        let status = self
            .api
            .upload_single(&file, &|sent: u64, _total: u64| report(&tracker.set_uploaded(sent)))
            .await
            .map_err(UploadError::SingleShotTransfer)?;

        report(&tracker.finish());
        Ok(status)
    }

    async fn upload_chunked(
        &self,
        item: &UploadItem,
        source: &ResolvedSource,
        observer: &Arc<dyn UploadObserver>,
        cancel_token: &CancellationToken,
    ) -> Result<ServerStatus, UploadError> {
        let plan = UploadPlan::chunked(source.size, self.chunk_size);
        let Some(upload_id) = plan.upload_id.clone() else {
            return Err(UploadError::Internal("分片计划缺少 uploadid".to_string()));
        };

        observer.on_status(item, UploadItemStatus::Uploading);

        let progress_item = item.clone();
        let progress_observer = observer.clone();
        let on_progress: ProgressCallback = Arc::new(move |snapshot: &ProgressSnapshot| {
            progress_observer.on_progress(&progress_item, snapshot)
        });

        let pool = ChunkWorkerPool::new(
            self.pool_config.clone(),
            self.storage.clone(),
            self.api.clone(),
            cancel_token.clone(),
        );
        pool.run(&source.path, &upload_id, plan.chunks, source.size, on_progress)
            .await?;

        // 合并前再检查一次取消
        if cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        observer.on_status(item, UploadItemStatus::Finalizing);

        let request = CompleteUploadRequest {
            upload_id,
            filename: item.display_name.clone(),
            mime_type: mime_or_default(&item.mime_type),
        };
        self.api
            .complete_upload(&request)
            .await
            .map_err(UploadError::Finalize)
    }
}

fn mime_or_default(mime_type: &str) -> String {
    if mime_type.trim().is_empty() {
        DEFAULT_MIME_TYPE.to_string()
    } else {
        mime_type.to_string()
    }
}
