// 上传引擎模块
//
// - 队列管理器：顺序处理条目，维护会话计数
// - 单文件引擎：按策略单次上传或分片上传
// - 分片工作池：有界并发 + 分片级指数退避重试

pub mod chunk;
pub mod engine;
pub mod error;
pub mod folder;
pub mod item;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod retention;
pub mod session;
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use chunk::{plan_chunks, ChunkDescriptor, ChunkState, UploadPlan, DEFAULT_UPLOAD_CHUNK_SIZE};
pub use engine::{FileReport, UploadEngine, UploadObserver};
pub use error::UploadError;
pub use folder::{FolderScanner, ScanOptions, ScannedFile};
pub use item::{UploadItem, UploadItemStatus, UploadOutcome};
pub use manager::{QueueSnapshot, UploadManager};
pub use pool::{ChunkWorkerPool, PoolConfig, PoolReport, ProgressCallback};
pub use progress::{estimate_eta, ProgressSnapshot, ProgressTracker};
pub use retention::RetentionPolicy;
pub use session::UploadSession;
pub use strategy::{StrategySelector, UploadStrategy, DEFAULT_SINGLE_SHOT_LIMIT};
