// 上传策略选择

use serde::{Deserialize, Serialize};

use crate::config::UploadConfig;
use crate::uploader::UploadItem;

/// 默认视频扩展名
pub const DEFAULT_VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

/// 默认单次上传上限: 95MB（上游请求体大小限制以下）
pub const DEFAULT_SINGLE_SHOT_LIMIT: u64 = 95 * 1024 * 1024;

/// 上传策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// 一次请求上传整个文件
    SingleShot,
    /// 分片上传后合并
    Chunked,
}

/// 策略选择器（纯函数，无副作用）
#[derive(Debug, Clone)]
pub struct StrategySelector {
    single_shot_limit: u64,
    video_extensions: Vec<String>,
}

impl StrategySelector {
    pub fn new(single_shot_limit: u64, video_extensions: &[String]) -> Self {
        Self {
            single_shot_limit,
            video_extensions: video_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.single_shot_limit_bytes(), &config.video_extensions)
    }

    /// 是否为视频（MIME 或扩展名任一命中）
    pub fn is_video(&self, item: &UploadItem) -> bool {
        if item
            .mime_type
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("video/"))
        {
            return true;
        }
        item.extension()
            .is_some_and(|ext| self.video_extensions.iter().any(|v| *v == ext))
    }

    /// 选择上传策略
    ///
    /// 视频始终分片；其他文件大小达到上限时分片
    pub fn select(&self, item: &UploadItem, size_bytes: u64) -> UploadStrategy {
        if self.is_video(item) || size_bytes >= self.single_shot_limit {
            UploadStrategy::Chunked
        } else {
            UploadStrategy::SingleShot
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        let extensions: Vec<String> = DEFAULT_VIDEO_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect();
        Self::new(DEFAULT_SINGLE_SHOT_LIMIT, &extensions)
    }
}
