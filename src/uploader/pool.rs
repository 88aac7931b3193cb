// 分片上传工作池
//
// 单个文件内固定数量的 worker 并发上传分片：
// - 待上传索引队列与分片表由同一把锁保护，取出 / 重新入队都是原子操作
// - 失败分片带着最早重试时间重新入队，由任意 worker 重试，累计尝试次数达到上限则整个文件失败
// - 退避期间 worker 继续处理其他分片
// - 失败或取消后不再调度新分片，已在上传中的分片允许完成

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{MediaApi, UploadErrorKind};
use crate::config::UploadConfig;
use crate::filesystem::LocalStorage;

use super::chunk::{ChunkDescriptor, ChunkState};
use super::error::UploadError;
use super::progress::{ProgressSnapshot, ProgressTracker};

/// 最大退避时间（毫秒）
const MAX_BACKOFF_MS: u64 = 5000;

/// 限流时的最小等待时间（毫秒）
const RATE_LIMIT_BACKOFF_MS: u64 = 10000;

/// 计算指数退避延迟
///
/// `initial * 2^retry_count`，上限 5s；限流时至少等待 10s
fn calculate_backoff_delay(
    initial: Duration,
    retry_count: u32,
    error_kind: UploadErrorKind,
) -> Duration {
    let base = initial.as_millis() as u64;
    let delay = base
        .saturating_mul(2u64.saturating_pow(retry_count))
        .min(MAX_BACKOFF_MS);

    if error_kind == UploadErrorKind::RateLimited {
        Duration::from_millis(delay.max(RATE_LIMIT_BACKOFF_MS))
    } else {
        Duration::from_millis(delay)
    }
}

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// 工作池参数
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 并发 worker 数量
    pub max_concurrent: usize,
    /// 单个分片最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 进度上报最小间隔
    pub progress_interval: Duration,
}

impl PoolConfig {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_chunks.max(1),
            max_attempts: config.max_chunk_retries.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            progress_interval: config.progress_interval(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// 工作池运行结果
#[derive(Debug, Clone)]
pub struct PoolReport {
    /// 最终分片表（全部为 Done）
    pub chunks: Vec<ChunkDescriptor>,
    pub elapsed: Duration,
}

/// 分片表
struct ChunkTable {
    pending: VecDeque<usize>,
    /// 退避中的分片及其最早重试时间
    delayed: Vec<(usize, Instant)>,
    chunks: Vec<ChunkDescriptor>,
}

impl ChunkTable {
    /// 取出一个已到期的退避分片（最早到期的优先）
    fn pop_due(&mut self, now: Instant) -> Option<usize> {
        let position = self
            .delayed
            .iter()
            .enumerate()
            .filter(|(_, (_, retry_at))| *retry_at <= now)
            .min_by_key(|(_, (_, retry_at))| *retry_at)
            .map(|(position, _)| position)?;
        Some(self.delayed.swap_remove(position).0)
    }

    fn next_retry_at(&self) -> Option<Instant> {
        self.delayed.iter().map(|(_, retry_at)| *retry_at).min()
    }
}

/// worker 取任务的结果
enum Take {
    Chunk(ChunkDescriptor),
    /// 暂无可取分片，但仍有分片可能重新入队；带最近一个退避分片的到期时间
    Wait(Option<Instant>),
    Finished,
}

/// 一次运行的共享状态
struct PoolRun {
    config: PoolConfig,
    storage: Arc<dyn LocalStorage>,
    api: Arc<dyn MediaApi>,
    cancel_token: CancellationToken,
    path: PathBuf,
    upload_id: String,
    table: Mutex<ChunkTable>,
    /// 尚未完成的分片数
    remaining: AtomicUsize,
    aborted: AtomicBool,
    /// 第一个导致失败的错误
    failure: Mutex<Option<UploadError>>,
    wakeup: Notify,
    tracker: ProgressTracker,
    on_progress: ProgressCallback,
}

impl PoolRun {
    fn take_next(&self) -> Take {
        let mut table = self.table.lock();

        if self.aborted.load(Ordering::SeqCst) {
            return Take::Finished;
        }

        let next = match table.pending.pop_front() {
            Some(index) => Some(index),
            None => table.pop_due(Instant::now()),
        };

        if let Some(index) = next {
            let chunk = &mut table.chunks[index];
            chunk.state = ChunkState::InFlight;
            chunk.attempt += 1;
            return Take::Chunk(chunk.clone());
        }

        if self.remaining.load(Ordering::SeqCst) == 0 {
            Take::Finished
        } else {
            Take::Wait(table.next_retry_at())
        }
    }

    fn set_state(&self, index: usize, state: ChunkState) {
        self.table.lock().chunks[index].state = state;
    }

    /// 重新入队，`delay` 之后才能被取出
    fn requeue_after(&self, index: usize, delay: Duration) {
        {
            let mut table = self.table.lock();
            table.chunks[index].state = ChunkState::Pending;
            if delay.is_zero() {
                table.pending.push_back(index);
            } else {
                table.delayed.push((index, Instant::now() + delay));
            }
        }
        // 等待中的 worker 需要按新的到期时间重新计算
        self.wakeup.notify_waiters();
    }

    /// 终止调度，只保留第一个错误
    fn abort(&self, error: UploadError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(error);
            }
        }
        self.aborted.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn mark_done(&self, chunk: &ChunkDescriptor) {
        self.set_state(chunk.index, ChunkState::Done);

        let snapshot = self.tracker.record_chunk(chunk.length);
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.wakeup.notify_waiters();
        }

        let on_progress = &self.on_progress;
        self.tracker.report(&snapshot, |s| on_progress(s));
    }
}

/// 分片上传工作池
pub struct ChunkWorkerPool {
    config: PoolConfig,
    storage: Arc<dyn LocalStorage>,
    api: Arc<dyn MediaApi>,
    cancel_token: CancellationToken,
}

impl ChunkWorkerPool {
    pub fn new(
        config: PoolConfig,
        storage: Arc<dyn LocalStorage>,
        api: Arc<dyn MediaApi>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            api,
            cancel_token,
        }
    }

    /// 上传全部分片
    ///
    /// 所有分片都为 Done 时才返回成功
    pub async fn run(
        &self,
        path: &Path,
        upload_id: &str,
        chunks: Vec<ChunkDescriptor>,
        total_size: u64,
        on_progress: ProgressCallback,
    ) -> Result<PoolReport, UploadError> {
        let started = Instant::now();
        let chunk_count = chunks.len();
        let worker_count = self.config.max_concurrent.max(1).min(chunk_count.max(1));

        info!(
            "开始分片上传: uploadid={}, 分片数={}, 并发={}, 最大尝试次数={}",
            upload_id, chunk_count, worker_count, self.config.max_attempts
        );

        let run = Arc::new(PoolRun {
            config: self.config.clone(),
            storage: self.storage.clone(),
            api: self.api.clone(),
            cancel_token: self.cancel_token.clone(),
            path: path.to_path_buf(),
            upload_id: upload_id.to_string(),
            table: Mutex::new(ChunkTable {
                pending: (0..chunk_count).collect(),
                delayed: Vec::new(),
                chunks,
            }),
            remaining: AtomicUsize::new(chunk_count),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
            wakeup: Notify::new(),
            tracker: ProgressTracker::new(total_size, chunk_count, self.config.progress_interval),
            on_progress,
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(run.clone(), worker_id));
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("分片上传 worker 异常退出: {}", e);
                run.abort(UploadError::Internal(format!("worker 异常退出: {}", e)));
            }
        }

        if let Some(failure) = run.failure.lock().take() {
            error!("分片上传失败: uploadid={}, 错误: {}", upload_id, failure);
            return Err(failure);
        }

        if run.remaining.load(Ordering::SeqCst) > 0 {
            // 没有记录错误却仍有未完成分片，只可能是被取消
            return Err(UploadError::Cancelled);
        }

        let chunks = std::mem::take(&mut run.table.lock().chunks);
        let elapsed = started.elapsed();
        info!(
            "分片上传完成: uploadid={}, 分片数={}, 耗时={:.2}s",
            upload_id,
            chunk_count,
            elapsed.as_secs_f64()
        );

        Ok(PoolReport { chunks, elapsed })
    }
}

async fn worker_loop(run: Arc<PoolRun>, worker_id: usize) {
    loop {
        if run.cancel_token.is_cancelled() {
            run.abort(UploadError::Cancelled);
            break;
        }

        let notified = run.wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let chunk = match run.take_next() {
            Take::Chunk(chunk) => chunk,
            Take::Finished => break,
            Take::Wait(retry_at) => {
                let backoff = async move {
                    match retry_at {
                        Some(retry_at) => tokio::time::sleep_until(retry_at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = &mut notified => {}
                    _ = backoff => {}
                    _ = run.cancel_token.cancelled() => {}
                }
                continue;
            }
        };

        upload_one(&run, worker_id, chunk).await;
    }

    debug!("[分片worker{}] 退出", worker_id);
}

async fn upload_one(run: &PoolRun, worker_id: usize, chunk: ChunkDescriptor) {
    let index = chunk.index;

    let data = match run
        .storage
        .read_range(&run.path, chunk.offset, chunk.length)
        .await
    {
        Ok(data) => data,
        Err(e) => {
            run.set_state(index, ChunkState::Failed);
            run.abort(UploadError::ChunkRead { index, source: e });
            return;
        }
    };

    // 每次网络请求前检查取消
    if run.cancel_token.is_cancelled() {
        run.set_state(index, ChunkState::Pending);
        run.abort(UploadError::Cancelled);
        return;
    }

    debug!(
        "[分片worker{}] 上传分片 #{} (第 {} 次)",
        worker_id, index, chunk.attempt
    );

    match run.api.upload_chunk(&run.upload_id, index, data).await {
        Ok(()) => run.mark_done(&chunk),
        Err(e) => {
            let kind = e.kind();
            if e.is_retriable() && chunk.attempt < run.config.max_attempts && !run.is_aborted() {
                let delay =
                    calculate_backoff_delay(run.config.initial_backoff, chunk.attempt - 1, kind);
                warn!(
                    "[分片worker{}] 分片 #{} 上传失败 ({}/{}), {}ms 后重试: {}",
                    worker_id,
                    index,
                    chunk.attempt,
                    run.config.max_attempts,
                    delay.as_millis(),
                    e
                );
                run.requeue_after(index, delay);
            } else {
                error!(
                    "[分片worker{}] 分片 #{} 上传失败，放弃 (已尝试 {} 次, 类型={:?}): {}",
                    worker_id, index, chunk.attempt, kind, e
                );
                run.set_state(index, ChunkState::Failed);
                run.abort(UploadError::ChunkTransfer {
                    index,
                    attempts: chunk.attempt,
                    source: e,
                });
            }
        }
    }
}
