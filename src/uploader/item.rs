// 上传条目与结果定义

use serde::{Deserialize, Serialize};

use crate::api::ServerStatus;

/// 单个条目的状态
///
/// Queued → Resolving → Uploading → Finalizing → {Succeeded | Duplicate | Failed}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadItemStatus {
    /// 等待中
    Queued,
    /// 解析源文件大小
    Resolving,
    /// 上传中
    Uploading,
    /// 合并分片中
    Finalizing,
    /// 上传成功
    Succeeded,
    /// 服务端已有相同文件
    Duplicate,
    /// 失败
    Failed,
}

/// 待上传的源文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadItem {
    /// 源文件句柄（`file://` URI 或平台相关的不透明 URI）
    pub source_uri: String,
    /// 显示名称（也作为服务端文件名）
    pub display_name: String,
    /// MIME 类型
    pub mime_type: String,
    /// 文件大小，入队时可能未知
    pub size_bytes: Option<u64>,
    /// 是否为本程序自己创建的临时副本（上传成功后由本程序删除）
    pub is_temporary_copy: bool,
}

impl UploadItem {
    /// 创建上传条目
    ///
    /// 未提供名称时使用 `media_<毫秒时间戳>`
    pub fn new(
        source_uri: impl Into<String>,
        display_name: Option<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        let display_name = display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("media_{}", chrono::Utc::now().timestamp_millis()));

        Self {
            source_uri: source_uri.into(),
            display_name,
            mime_type: mime_type.into(),
            size_bytes: None,
            is_temporary_copy: false,
        }
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// 标记为临时副本
    pub fn temporary_copy(mut self) -> Self {
        self.is_temporary_copy = true;
        self
    }

    /// 小写扩展名，优先取显示名称，其次取 URI
    pub fn extension(&self) -> Option<String> {
        fn ext_of(name: &str) -> Option<String> {
            let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
            let (stem, ext) = base.rsplit_once('.')?;
            if stem.is_empty() || ext.is_empty() {
                return None;
            }
            Some(ext.to_ascii_lowercase())
        }

        ext_of(&self.display_name).or_else(|| ext_of(&self.source_uri))
    }
}

/// 单个条目的最终结果，记录后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Succeeded { display_name: String },
    Duplicate { display_name: String },
    Failed { display_name: String, error: String },
}

impl UploadOutcome {
    pub fn failed(display_name: impl Into<String>, error: impl ToString) -> Self {
        UploadOutcome::Failed {
            display_name: display_name.into(),
            error: error.to_string(),
        }
    }

    /// 将服务端状态映射为结果，未知状态视为失败
    pub fn from_server_status(display_name: &str, status: ServerStatus) -> Self {
        let display_name = display_name.to_string();
        match status {
            ServerStatus::Uploaded => UploadOutcome::Succeeded { display_name },
            ServerStatus::Duplicate => UploadOutcome::Duplicate { display_name },
            ServerStatus::Other(status) => UploadOutcome::Failed {
                display_name,
                error: format!("服务端返回未知状态: {:?}", status),
            },
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            UploadOutcome::Succeeded { display_name }
            | UploadOutcome::Duplicate { display_name }
            | UploadOutcome::Failed { display_name, .. } => display_name,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            UploadOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// 成功或重复（服务端已持有文件）
    pub fn is_success(&self) -> bool {
        !matches!(self, UploadOutcome::Failed { .. })
    }

    pub fn status(&self) -> UploadItemStatus {
        match self {
            UploadOutcome::Succeeded { .. } => UploadItemStatus::Succeeded,
            UploadOutcome::Duplicate { .. } => UploadItemStatus::Duplicate,
            UploadOutcome::Failed { .. } => UploadItemStatus::Failed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadOutcome::Succeeded { .. } => "succeeded",
            UploadOutcome::Duplicate { .. } => "duplicate",
            UploadOutcome::Failed { .. } => "failed",
        }
    }
}
