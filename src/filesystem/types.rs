// 文件系统模块数据类型定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `file://` URI 前缀
pub const FILE_URI_PREFIX: &str = "file://";

/// 源文件解析结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// 可直接读取的本地路径
    ///
    /// 为 `None` 时源文件只能通过 `copy_to_temp` 获得可读副本
    pub path: Option<PathBuf>,
    /// 文件大小（字节）
    pub size: u64,
}

impl FileStat {
    pub fn readable(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: Some(path.into()),
            size,
        }
    }

    pub fn opaque(size: u64) -> Self {
        Self { path: None, size }
    }
}

/// 媒体库删除错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaLibraryError {
    /// 用户拒绝了删除确认
    #[error("用户取消了删除")]
    Cancelled,

    #[error("删除媒体失败: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stat_constructors() {
        let stat = FileStat::readable("/tmp/a.jpg", 12);
        assert_eq!(stat.path, Some(PathBuf::from("/tmp/a.jpg")));
        assert_eq!(stat.size, 12);

        let stat = FileStat::opaque(7);
        assert!(stat.path.is_none());
    }
}
