// 单文件上传进度与剩余时间估算

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::events::ProgressThrottler;

/// 进度快照
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub completed_chunks: usize,
    pub total_chunks: usize,
    /// 0-100
    pub percent: f64,
    pub elapsed: Duration,
    /// 至少完成一部分数据前为 None
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.percent >= 100.0
    }
}

/// 按平均速度外推剩余时间
///
/// `eta = (total - uploaded) / (uploaded / elapsed)`
pub fn estimate_eta(uploaded: u64, total: u64, elapsed: Duration) -> Option<Duration> {
    if uploaded == 0 {
        return None;
    }
    if uploaded >= total {
        return Some(Duration::ZERO);
    }
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    let rate = uploaded as f64 / secs;
    Some(Duration::from_secs_f64((total - uploaded) as f64 / rate))
}

/// 单文件进度跟踪器
///
/// 多个 worker 并发累加计数，上报经过节流器（同一文件内百分比不回退）
#[derive(Debug)]
pub struct ProgressTracker {
    total_bytes: u64,
    total_chunks: usize,
    uploaded_bytes: AtomicU64,
    completed_chunks: AtomicUsize,
    started: Instant,
    throttler: ProgressThrottler,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, total_chunks: usize, interval: Duration) -> Self {
        Self {
            total_bytes,
            total_chunks,
            uploaded_bytes: AtomicU64::new(0),
            completed_chunks: AtomicUsize::new(0),
            started: Instant::now(),
            throttler: ProgressThrottler::new(interval),
        }
    }

    /// 记录一个完成的分片
    pub fn record_chunk(&self, bytes: u64) -> ProgressSnapshot {
        self.uploaded_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.completed_chunks.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }

    /// 单次上传时直接设置已发送字节
    ///
    /// 字节全部发出不代表服务端已接受，最多停在 `total - 1`，100% 只由 `finish` 产生
    pub fn set_uploaded(&self, bytes: u64) -> ProgressSnapshot {
        let ceiling = self.total_bytes.saturating_sub(1);
        self.uploaded_bytes
            .fetch_max(bytes.min(ceiling), Ordering::SeqCst);
        self.snapshot()
    }

    /// 标记全部完成
    pub fn finish(&self) -> ProgressSnapshot {
        self.uploaded_bytes.store(self.total_bytes, Ordering::SeqCst);
        self.completed_chunks
            .store(self.total_chunks, Ordering::SeqCst);
        self.snapshot()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let uploaded_bytes = self.uploaded_bytes.load(Ordering::SeqCst);
        let completed_chunks = self.completed_chunks.load(Ordering::SeqCst);
        let elapsed = self.started.elapsed();

        let percent = if self.total_bytes == 0 {
            if self.total_chunks > 0 && completed_chunks >= self.total_chunks {
                100.0
            } else {
                0.0
            }
        } else {
            (uploaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        };

        let eta = if percent >= 100.0 {
            Some(Duration::ZERO)
        } else {
            estimate_eta(uploaded_bytes, self.total_bytes, elapsed)
        };

        ProgressSnapshot {
            uploaded_bytes,
            total_bytes: self.total_bytes,
            completed_chunks,
            total_chunks: self.total_chunks,
            percent,
            elapsed,
            eta,
        }
    }

    /// 经节流后上报，100% 总是上报
    pub fn report<F>(&self, snapshot: &ProgressSnapshot, emit: F) -> bool
    where
        F: FnOnce(&ProgressSnapshot),
    {
        self.throttler
            .emit_if_due(snapshot.percent, snapshot.is_complete(), |_| emit(snapshot))
    }
}
