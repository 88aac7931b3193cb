// 上传接口类型定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 单次上传端点
pub const UPLOAD_PATH: &str = "/media/upload";

/// 分片上传端点
pub const UPLOAD_CHUNK_PATH: &str = "/media/upload-chunk";

/// 合并分片端点
pub const UPLOAD_COMPLETE_PATH: &str = "/media/upload-complete";

/// 客户端日志上报端点
pub const CLIENT_LOG_PATH: &str = "/logs/client";

/// 分片上传请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    pub upload_id: String,
    pub chunk_index: usize,
    /// 分片内容（base64）
    pub file_chunk: String,
}

/// 合并分片请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub filename: String,
    pub mime_type: String,
}

/// 一条上报的客户端日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLogRecord {
    /// log / info / warn / error
    pub level: String,
    /// ISO 8601 时间
    pub timestamp: String,
    pub messages: Vec<String>,
}

/// 日志上报请求体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLogBatch {
    pub logs: Vec<ClientLogRecord>,
}

/// 单次上传的文件描述
#[derive(Debug, Clone)]
pub struct SingleShotFile {
    /// 可直接读取的本地路径
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// 服务端返回的 `{status}` 响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
}

impl StatusResponse {
    pub fn server_status(&self) -> ServerStatus {
        ServerStatus::parse(&self.status)
    }
}

/// 服务端对一次上传的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// 新文件已接收
    Uploaded,
    /// 服务端已有相同文件
    Duplicate,
    /// 其他状态（视为失败）
    Other(String),
}

impl ServerStatus {
    /// 解析服务端状态字符串
    ///
    /// `processing` 表示服务端已接收并在后台处理，等同于 `uploaded`
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "uploaded" | "processing" => ServerStatus::Uploaded,
            "duplicate" => ServerStatus::Duplicate,
            _ => ServerStatus::Other(status.to_string()),
        }
    }
}

/// 上传错误类型（用于日志与退避时间计算）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    Network,
    Timeout,
    ServerError,
    /// 限流，需要更长等待时间
    RateLimited,
    /// 未登录或 Token 失效
    Unauthorized,
    Forbidden,
    BadRequest,
    NotFound,
    PayloadTooLarge,
    Unknown,
}

impl UploadErrorKind {
    /// 从 HTTP 状态码转换
    pub fn from_status_code(status: u16) -> Self {
        match status {
            401 => UploadErrorKind::Unauthorized,
            403 => UploadErrorKind::Forbidden,
            404 => UploadErrorKind::NotFound,
            408 => UploadErrorKind::Timeout,
            413 => UploadErrorKind::PayloadTooLarge,
            429 => UploadErrorKind::RateLimited,
            400..=499 => UploadErrorKind::BadRequest,
            500..=599 => UploadErrorKind::ServerError,
            _ => UploadErrorKind::Unknown,
        }
    }
}

/// 上传接口错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("缺少认证令牌")]
    MissingToken,

    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("服务器返回状态码 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),

    #[error("读取本地文件失败: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// 错误分类
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            ApiError::MissingToken => UploadErrorKind::Unauthorized,
            ApiError::Timeout(_) => UploadErrorKind::Timeout,
            ApiError::Network(_) => UploadErrorKind::Network,
            ApiError::Status { status, .. } => UploadErrorKind::from_status_code(*status),
            ApiError::InvalidResponse(_) | ApiError::Io(_) => UploadErrorKind::Unknown,
        }
    }

    /// 分片是否值得再次尝试
    ///
    /// 只有令牌缺失直接放弃；401 等错误在下次请求时会重新获取令牌
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ApiError::MissingToken)
    }

    /// 从 reqwest 错误转换（区分超时与其他网络错误）
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout(error.to_string())
        } else if let Some(status) = error.status() {
            ApiError::Status {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else if error.is_decode() {
            ApiError::InvalidResponse(error.to_string())
        } else {
            ApiError::Network(error.to_string())
        }
    }
}
