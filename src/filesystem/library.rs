// 媒体库删除能力

use async_trait::async_trait;
use tracing::{info, warn};

use super::service::uri_to_path;
use super::types::MediaLibraryError;

/// 媒体库
///
/// 删除可能需要用户确认，拒绝时返回 `MediaLibraryError::Cancelled`
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn delete_assets(&self, uris: &[String]) -> Result<(), MediaLibraryError>;
}

/// 直接删除本地文件的媒体库实现（命令行场景无需确认）
#[derive(Debug, Clone, Default)]
pub struct FsMediaLibrary;

impl FsMediaLibrary {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaLibrary for FsMediaLibrary {
    async fn delete_assets(&self, uris: &[String]) -> Result<(), MediaLibraryError> {
        let mut failures = Vec::new();

        for uri in uris {
            let Some(path) = uri_to_path(uri) else {
                failures.push(format!("{}: 不支持的 URI", uri));
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("已删除源文件: {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("源文件已不存在: {:?}", path)
                }
                Err(e) => failures.push(format!("{}: {}", uri, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MediaLibraryError::Failed(failures.join("; ")))
        }
    }
}
