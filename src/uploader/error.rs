// 单文件上传错误分类

use crate::api::ApiError;

/// 单个条目的上传错误（任一错误都只导致该条目失败，不会中断队列）
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// 无法解析源文件（不重试）
    #[error("无法解析源文件 {uri}: {source:#}")]
    SizeResolution {
        uri: String,
        #[source]
        source: anyhow::Error,
    },

    /// 读取分片数据失败
    #[error("读取分片 #{index} 失败: {source:#}")]
    ChunkRead {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// 分片上传失败（已用尽重试或错误不可重试）
    #[error("分片 #{index} 上传失败（已尝试 {attempts} 次）: {source}")]
    ChunkTransfer {
        index: usize,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// 合并分片失败
    #[error("合并分片失败: {0}")]
    Finalize(#[source] ApiError),

    /// 单次上传失败
    #[error("上传失败: {0}")]
    SingleShotTransfer(#[source] ApiError),

    #[error("上传已取消")]
    Cancelled,

    /// 上传流程内部异常（例如任务 panic）
    #[error("内部错误: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}
