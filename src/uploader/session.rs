// 上传会话（一批条目的汇总计数）

use serde::Serialize;

use crate::events::SessionSummary;

use super::item::UploadOutcome;

/// 上传会话
///
/// 队列未清空前继续入队会扩大当前会话，而不是新开会话。
/// 不变量：`total_items >= completed_items == outcomes.len()`
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSession {
    total_items: usize,
    completed_items: usize,
    outcomes: Vec<UploadOutcome>,
    /// 推迟到会话结束统一删除的源文件
    deferred_deletions: Vec<String>,
}

impl UploadSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 增加条目总数
    pub fn extend(&mut self, added: usize) {
        self.total_items += added;
    }

    /// 记录一个条目的结果
    pub fn record(&mut self, outcome: UploadOutcome) {
        self.outcomes.push(outcome);
        self.completed_items += 1;
        self.total_items = self.total_items.max(self.completed_items);
    }

    pub fn defer_deletion(&mut self, uri: String) {
        self.deferred_deletions.push(uri);
    }

    pub fn take_deferred(&mut self) -> Vec<String> {
        std::mem::take(&mut self.deferred_deletions)
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn completed_items(&self) -> usize {
        self.completed_items
    }

    pub fn outcomes(&self) -> &[UploadOutcome] {
        &self.outcomes
    }

    pub fn has_activity(&self) -> bool {
        self.completed_items > 0
    }

    pub fn summary(&self) -> SessionSummary {
        let mut summary = SessionSummary::default();
        for outcome in &self.outcomes {
            match outcome {
                UploadOutcome::Succeeded { .. } => summary.succeeded += 1,
                UploadOutcome::Duplicate { .. } => summary.duplicate += 1,
                UploadOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}
