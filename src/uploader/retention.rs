// 上传后的本地文件保留策略
//
// 成功 / 重复：删除临时副本，按配置处理原始文件；失败：什么都不删。
// 删除失败只记日志

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{RetentionConfig, SourceDeletionPolicy};
use crate::filesystem::{LocalStorage, MediaLibrary, MediaLibraryError};

use super::engine::FileReport;
use super::item::UploadItem;

/// 保留策略
pub struct RetentionPolicy {
    storage: Arc<dyn LocalStorage>,
    library: Arc<dyn MediaLibrary>,
    source_deletion: SourceDeletionPolicy,
    delete_temp_copies: bool,
}

impl RetentionPolicy {
    pub fn new(
        storage: Arc<dyn LocalStorage>,
        library: Arc<dyn MediaLibrary>,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            storage,
            library,
            source_deletion: config.source_deletion,
            delete_temp_copies: config.delete_temp_copies,
        }
    }

    /// 处理单个条目
    ///
    /// 返回需要推迟到会话结束再删除的源文件 URI
    pub async fn apply(&self, item: &UploadItem, report: &FileReport) -> Option<String> {
        if !report.outcome.is_success() {
            debug!("上传未成功，保留所有文件: {}", item.display_name);
            return None;
        }

        if self.delete_temp_copies {
            if let Some(copy) = &report.staged_copy {
                self.delete_local(&copy.to_string_lossy()).await;
            }
        }

        // 临时副本本身就是源文件，不属于媒体库
        if item.is_temporary_copy {
            if self.delete_temp_copies {
                self.delete_local(&item.source_uri).await;
            }
            return None;
        }

        match self.source_deletion {
            SourceDeletionPolicy::Keep => None,
            SourceDeletionPolicy::Automatic => {
                self.delete_assets(std::slice::from_ref(&item.source_uri))
                    .await;
                None
            }
            SourceDeletionPolicy::Deferred => Some(item.source_uri.clone()),
        }
    }

    /// 会话结束时统一删除
    pub async fn flush_deferred(&self, uris: Vec<String>) {
        if uris.is_empty() {
            return;
        }
        info!("请求删除 {} 个已上传的源文件", uris.len());
        self.delete_assets(&uris).await;
    }

    async fn delete_local(&self, uri: &str) {
        match self.storage.delete_local(uri).await {
            Ok(()) => debug!("已删除临时文件: {}", uri),
            Err(e) => warn!("删除临时文件失败: {}, 错误: {:#}", uri, e),
        }
    }

    async fn delete_assets(&self, uris: &[String]) {
        match self.library.delete_assets(uris).await {
            Ok(()) => info!("已删除 {} 个源文件", uris.len()),
            Err(MediaLibraryError::Cancelled) => info!("用户取消了删除源文件"),
            Err(e) => warn!("删除源文件失败: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::item::UploadOutcome;
    use crate::uploader::strategy::UploadStrategy;
    use crate::uploader::test_support::{MockLibrary, MockStorage};
    use std::path::PathBuf;

    fn create_policy(
        source_deletion: SourceDeletionPolicy,
    ) -> (RetentionPolicy, Arc<MockStorage>, Arc<MockLibrary>) {
        let storage = Arc::new(MockStorage::new());
        let library = Arc::new(MockLibrary::new());
        let policy = RetentionPolicy::new(
            storage.clone(),
            library.clone(),
            &RetentionConfig {
                source_deletion,
                delete_temp_copies: true,
            },
        );
        (policy, storage, library)
    }

    fn report(outcome: UploadOutcome, staged_copy: Option<&str>) -> FileReport {
        FileReport {
            outcome,
            strategy: Some(UploadStrategy::SingleShot),
            staged_copy: staged_copy.map(PathBuf::from),
        }
    }

    fn gallery_item() -> UploadItem {
        UploadItem::new("file:///dcim/a.jpg", Some("a.jpg".into()), "image/jpeg")
    }

    #[tokio::test]
    async fn test_failed_deletes_nothing() {
        let (policy, storage, library) = create_policy(SourceDeletionPolicy::Automatic);
        let item = gallery_item().temporary_copy();

        let deferred = policy
            .apply(
                &item,
                &report(UploadOutcome::failed("a.jpg", "boom"), Some("/staging/copy_1")),
            )
            .await;

        assert!(deferred.is_none());
        assert!(storage.deleted().is_empty());
        assert!(library.batches().is_empty());
    }

    #[tokio::test]
    async fn test_temporary_copy_deleted_on_success() {
        let (policy, storage, library) = create_policy(SourceDeletionPolicy::Deferred);
        let item = UploadItem::new("file:///cache/tmp_a.jpg", Some("a.jpg".into()), "image/jpeg")
            .temporary_copy();

        let deferred = policy
            .apply(
                &item,
                &report(
                    UploadOutcome::Duplicate {
                        display_name: "a.jpg".into(),
                    },
                    None,
                ),
            )
            .await;

        assert!(deferred.is_none());
        assert_eq!(storage.deleted(), vec!["file:///cache/tmp_a.jpg".to_string()]);
        assert!(library.batches().is_empty());
    }

    #[tokio::test]
    async fn test_staged_copy_and_deferred_source() {
        let (policy, storage, library) = create_policy(SourceDeletionPolicy::Deferred);

        let deferred = policy
            .apply(
                &gallery_item(),
                &report(
                    UploadOutcome::Succeeded {
                        display_name: "a.jpg".into(),
                    },
                    Some("/staging/copy_1"),
                ),
            )
            .await;

        assert_eq!(deferred, Some("file:///dcim/a.jpg".to_string()));
        assert_eq!(storage.deleted(), vec!["/staging/copy_1".to_string()]);
        assert!(library.batches().is_empty());

        policy.flush_deferred(vec![deferred.unwrap()]).await;
        assert_eq!(
            library.batches(),
            vec![vec!["file:///dcim/a.jpg".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_automatic_and_keep() {
        let (policy, _, library) = create_policy(SourceDeletionPolicy::Automatic);
        let success = report(
            UploadOutcome::Succeeded {
                display_name: "a.jpg".into(),
            },
            None,
        );
        assert!(policy.apply(&gallery_item(), &success).await.is_none());
        assert_eq!(library.batches().len(), 1);

        let (policy, storage, library) = create_policy(SourceDeletionPolicy::Keep);
        assert!(policy.apply(&gallery_item(), &success).await.is_none());
        assert!(library.batches().is_empty());
        assert!(storage.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_errors_are_swallowed() {
        let (policy, _, library) = create_policy(SourceDeletionPolicy::Deferred);
        library.respond_with(MediaLibraryError::Cancelled);
        policy
            .flush_deferred(vec!["file:///dcim/a.jpg".to_string()])
            .await;

        library.respond_with(MediaLibraryError::Failed("io".into()));
        policy
            .flush_deferred(vec!["file:///dcim/b.jpg".to_string()])
            .await;

        assert_eq!(library.batches().len(), 2);

        policy.flush_deferred(Vec::new()).await;
        assert_eq!(library.batches().len(), 2);
    }
}
