// 上传事件类型定义

use serde::{Deserialize, Serialize};

use crate::uploader::UploadItemStatus;

/// 会话汇总（成功 / 重复 / 失败计数）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub succeeded: usize,
    pub duplicate: usize,
    pub failed: usize,
}

impl SessionSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.duplicate + self.failed
    }
}

/// 进度报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// 会话内文件总数
    pub total_files: usize,
    /// 已结束的文件数
    pub completed_files: usize,
    /// 当前文件名
    pub current_file: Option<String>,
    /// 当前文件进度（0-100）
    pub percent: f64,
    /// 预计剩余秒数，未知时为 None
    pub eta_secs: Option<u64>,
    /// 当前文件已用时间（毫秒）
    pub elapsed_ms: u64,
}

impl ProgressReport {
    /// 人类可读的进度描述
    pub fn describe(&self) -> String {
        let position = (self.completed_files + 1).min(self.total_files.max(1));
        let name = self.current_file.as_deref().unwrap_or("-");
        let eta = match self.eta_secs {
            Some(secs) if secs >= 60 => format!("剩余约 {} 分 {} 秒", secs / 60, secs % 60),
            Some(secs) => format!("剩余约 {} 秒", secs),
            None => "剩余时间计算中".to_string(),
        };
        format!(
            "正在上传 {}/{}: {} {:.0}%，{}",
            position, self.total_files, name, self.percent, eta
        )
    }
}

/// 上传事件（通过 broadcast 发布给订阅者）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 新文件入队
    Enqueued { added: usize, total_files: usize },
    /// 进度更新
    Progress(ProgressReport),
    /// 单个文件状态变更
    StatusChanged {
        file_name: String,
        status: UploadItemStatus,
    },
    /// 单个文件结束
    FileFinished {
        file_name: String,
        outcome: String,
        error: Option<String>,
    },
    /// 会话结束
    SessionCompleted(SessionSummary),
}

impl UploadEvent {
    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Enqueued { .. } => "enqueued",
            UploadEvent::Progress(_) => "progress",
            UploadEvent::StatusChanged { .. } => "status_changed",
            UploadEvent::FileFinished { .. } => "file_finished",
            UploadEvent::SessionCompleted(_) => "session_completed",
        }
    }
}
