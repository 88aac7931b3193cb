// 测试用的存储 / 接口 / 通知替身

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::api::{ApiError, CompleteUploadRequest, MediaApi, ServerStatus, SingleShotFile};
use crate::events::{ProgressReport, SessionSummary, UploadNotifier};
use crate::filesystem::{uri_to_path, FileStat, LocalStorage, MediaLibrary, MediaLibraryError};

use super::item::{UploadItem, UploadItemStatus};
use super::progress::ProgressSnapshot;
use super::engine::UploadObserver;

/// 内存中的本地存储
#[derive(Default)]
pub struct MockStorage {
    files: Mutex<HashMap<String, FileStat>>,
    fail_read_offset: Mutex<Option<u64>>,
    copied: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 可直接读取的文件
    pub fn add_file(&self, uri: &str, size: u64) {
        let path = uri_to_path(uri).unwrap_or_else(|| PathBuf::from(uri));
        self.files
            .lock()
            .insert(uri.to_string(), FileStat::readable(path, size));
    }

    /// 只能复制后读取的文件
    pub fn add_opaque(&self, uri: &str, size: u64) {
        self.files.lock().insert(uri.to_string(), FileStat::opaque(size));
    }

    pub fn fail_reads_at(&self, offset: u64) {
        *self.fail_read_offset.lock() = Some(offset);
    }

    pub fn copied(&self) -> Vec<String> {
        self.copied.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl LocalStorage for MockStorage {
    async fn stat_file(&self, uri: &str) -> Result<FileStat> {
        match self.files.lock().get(uri) {
            Some(stat) => Ok(stat.clone()),
            None => bail!("文件不存在: {}", uri),
        }
    }

    async fn read_range(&self, _path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        if *self.fail_read_offset.lock() == Some(offset) {
            bail!("模拟读取失败: offset={}", offset);
        }
        Ok(vec![0u8; length as usize])
    }

    async fn copy_to_temp(&self, uri: &str) -> Result<PathBuf> {
        let mut copied = self.copied.lock();
        copied.push(uri.to_string());
        Ok(PathBuf::from(format!("/staging/copy_{}", copied.len())))
    }

    async fn delete_local(&self, uri: &str) -> Result<()> {
        self.deleted.lock().push(uri.to_string());
        Ok(())
    }
}

type ErrorFactory = fn() -> ApiError;

fn server_unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }
}

/// 可编排失败的上传接口
pub struct MockApi {
    delay: Duration,
    chunk_failures: Mutex<HashMap<usize, (u32, ErrorFactory)>>,
    chunk_calls: Mutex<HashMap<usize, u32>>,
    chunk_order: Mutex<Vec<usize>>,
    chunk_bytes: AtomicU64,
    upload_ids: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    in_flight_per_index: Mutex<HashMap<usize, usize>>,
    max_in_flight_per_index: AtomicUsize,
    single_calls: Mutex<Vec<String>>,
    single_failures: Mutex<HashMap<String, ErrorFactory>>,
    single_status: Mutex<ServerStatus>,
    complete_calls: Mutex<Vec<CompleteUploadRequest>>,
    complete_status: Mutex<ServerStatus>,
    complete_failure: Mutex<Option<ErrorFactory>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            chunk_failures: Mutex::new(HashMap::new()),
            chunk_calls: Mutex::new(HashMap::new()),
            chunk_order: Mutex::new(Vec::new()),
            chunk_bytes: AtomicU64::new(0),
            upload_ids: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            in_flight_per_index: Mutex::new(HashMap::new()),
            max_in_flight_per_index: AtomicUsize::new(0),
            single_calls: Mutex::new(Vec::new()),
            single_failures: Mutex::new(HashMap::new()),
            single_status: Mutex::new(ServerStatus::Uploaded),
            complete_calls: Mutex::new(Vec::new()),
            complete_status: Mutex::new(ServerStatus::Uploaded),
            complete_failure: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    /// 每个分片请求的模拟耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 分片 `index` 的前 `times` 次请求返回 503
    pub fn fail_chunk(&self, index: usize, times: u32) {
        self.fail_chunk_with(index, times, server_unavailable);
    }

    pub fn fail_chunk_with(&self, index: usize, times: u32, error: ErrorFactory) {
        self.chunk_failures.lock().insert(index, (times, error));
    }

    pub fn fail_single_for(&self, file_name: &str) {
        self.single_failures
            .lock()
            .insert(file_name.to_string(), server_unavailable);
    }

    pub fn set_single_status(&self, status: ServerStatus) {
        *self.single_status.lock() = status;
    }

    pub fn set_complete_status(&self, status: ServerStatus) {
        *self.complete_status.lock() = status;
    }

    pub fn fail_complete(&self) {
        *self.complete_failure.lock() = Some(server_unavailable);
    }

    /// 单次上传在取得许可前阻塞，用于控制队列推进节奏
    pub fn gate_single_uploads(&self) -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(semaphore.clone());
        semaphore
    }

    pub fn chunk_calls(&self, index: usize) -> u32 {
        self.chunk_calls.lock().get(&index).copied().unwrap_or(0)
    }

    /// 分片请求的发起顺序
    pub fn chunk_order(&self) -> Vec<usize> {
        self.chunk_order.lock().clone()
    }

    pub fn total_chunk_calls(&self) -> u32 {
        self.chunk_calls.lock().values().sum()
    }

    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_bytes.load(Ordering::SeqCst)
    }

    pub fn upload_ids(&self) -> Vec<String> {
        let mut ids = self.upload_ids.lock().clone();
        ids.dedup();
        ids
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_per_index(&self) -> usize {
        self.max_in_flight_per_index.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> Vec<String> {
        self.single_calls.lock().clone()
    }

    pub fn complete_calls(&self) -> Vec<CompleteUploadRequest> {
        self.complete_calls.lock().clone()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaApi for MockApi {
    async fn upload_single(
        &self,
        file: &SingleShotFile,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<ServerStatus, ApiError> {
        self.single_calls.lock().push(file.file_name.clone());

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        // 字节全部发出后服务端才给出结果
        on_progress(file.size / 2, file.size);
        on_progress(file.size, file.size);

        if let Some(error) = self.single_failures.lock().get(&file.file_name) {
            return Err(error());
        }
        Ok(self.single_status.lock().clone())
    }

    async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        data: Vec<u8>,
    ) -> Result<(), ApiError> {
        self.upload_ids.lock().push(upload_id.to_string());
        *self.chunk_calls.lock().entry(chunk_index).or_insert(0) += 1;
        self.chunk_order.lock().push(chunk_index);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        {
            let mut per_index = self.in_flight_per_index.lock();
            let count = per_index.entry(chunk_index).or_insert(0);
            *count += 1;
            self.max_in_flight_per_index
                .fetch_max(*count, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = {
            let mut failures = self.chunk_failures.lock();
            match failures.get_mut(&chunk_index) {
                Some((remaining, error)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*error)
                }
                _ => None,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.in_flight_per_index.lock().get_mut(&chunk_index) {
            *count -= 1;
        }

        match failure {
            Some(error) => Err(error()),
            None => {
                self.chunk_bytes
                    .fetch_add(data.len() as u64, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> Result<ServerStatus, ApiError> {
        self.complete_calls.lock().push(request.clone());
        if let Some(error) = *self.complete_failure.lock() {
            return Err(error());
        }
        Ok(self.complete_status.lock().clone())
    }
}

/// 记录媒体库删除请求
#[derive(Default)]
pub struct MockLibrary {
    batches: Mutex<Vec<Vec<String>>>,
    result: Mutex<Option<MediaLibraryError>>,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, error: MediaLibraryError) {
        *self.result.lock() = Some(error);
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl MediaLibrary for MockLibrary {
    async fn delete_assets(&self, uris: &[String]) -> Result<(), MediaLibraryError> {
        self.batches.lock().push(uris.to_vec());
        match self.result.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// 记录进度与汇总
#[derive(Default)]
pub struct RecordingNotifier {
    pub progress: Mutex<Vec<ProgressReport>>,
    pub summaries: Mutex<Vec<SessionSummary>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadNotifier for RecordingNotifier {
    fn report_progress(&self, report: &ProgressReport) {
        self.progress.lock().push(report.clone());
    }

    fn report_summary(&self, summary: &SessionSummary) {
        self.summaries.lock().push(*summary);
    }
}

/// 记录单个文件的状态与进度
#[derive(Default)]
pub struct RecordingObserver {
    pub statuses: Mutex<Vec<UploadItemStatus>>,
    pub percents: Mutex<Vec<f64>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadObserver for RecordingObserver {
    fn on_status(&self, _item: &UploadItem, status: UploadItemStatus) {
        self.statuses.lock().push(status);
    }

    fn on_progress(&self, _item: &UploadItem, snapshot: &ProgressSnapshot) {
        self.percents.lock().push(snapshot.percent);
    }
}
