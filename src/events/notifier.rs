// 进度 / 汇总通知接口

use tracing::info;

use super::types::{ProgressReport, SessionSummary};

/// 通知渲染方（fire-and-forget，不消费返回值）
pub trait UploadNotifier: Send + Sync {
    fn report_progress(&self, report: &ProgressReport);

    fn report_summary(&self, summary: &SessionSummary);
}

/// 写日志的通知实现
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl UploadNotifier for LogNotifier {
    fn report_progress(&self, report: &ProgressReport) {
        info!("{}", report.describe());
    }

    fn report_summary(&self, summary: &SessionSummary) {
        info!(
            "上传完成: 成功 {} 个, 重复 {} 个, 失败 {} 个",
            summary.succeeded, summary.duplicate, summary.failed
        );
    }
}
