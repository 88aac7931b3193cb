// 上传接口模块
//
// 封装服务端的上传端点（单次上传、分片上传、合并分片）以及客户端日志上报

pub mod client;
pub mod types;

pub use client::{HttpMediaApi, LogSink, MediaApi};
pub use types::{
    ApiError, ChunkUploadRequest, ClientLogBatch, ClientLogRecord, CompleteUploadRequest,
    ServerStatus, SingleShotFile, StatusResponse, UploadErrorKind, CLIENT_LOG_PATH,
    UPLOAD_CHUNK_PATH, UPLOAD_COMPLETE_PATH, UPLOAD_PATH,
};
