// Media Uploader Library
// 媒体文件后台上传核心库

// 认证模块（仅提供 Bearer Token）
pub mod auth;

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 上传接口客户端模块
pub mod api;

// 本地文件与媒体库模块
pub mod filesystem;

// 上传事件与进度通知模块
pub mod events;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use api::{ApiError, HttpMediaApi, LogSink, MediaApi, ServerStatus, UploadErrorKind};
pub use auth::{EnvTokenProvider, StaticTokenProvider, TokenProvider};
pub use config::{AppConfig, SourceDeletionPolicy};
pub use events::{LogNotifier, ProgressReport, SessionSummary, UploadEvent, UploadNotifier};
pub use filesystem::{FsMediaLibrary, FsStorage, LocalStorage, MediaLibrary};
pub use uploader::{
    ChunkDescriptor, ChunkState, ChunkWorkerPool, RetentionPolicy, StrategySelector, UploadEngine,
    UploadError, UploadItem, UploadManager, UploadOutcome, UploadPlan, UploadSession,
    UploadStrategy,
};
