// 本地存储服务
//
// 解析源文件 URI、按范围读取分片、暂存临时副本、删除本地文件

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::types::{FileStat, FILE_URI_PREFIX};

/// 本地存储能力
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// 解析源文件，得到可读路径（若有）和大小
    async fn stat_file(&self, uri: &str) -> Result<FileStat>;

    /// 读取 `[offset, offset + length)` 范围的字节
    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// 将源文件复制到私有临时目录，返回副本路径
    async fn copy_to_temp(&self, uri: &str) -> Result<PathBuf>;

    /// 删除本地文件，文件不存在视为成功
    async fn delete_local(&self, uri: &str) -> Result<()>;
}

/// 将 `file://` URI 或普通路径转为本地路径，其他 scheme 返回 `None`
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix(FILE_URI_PREFIX) {
        return Some(PathBuf::from(rest));
    }
    if uri.contains("://") {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// 基于本地文件系统的存储实现
#[derive(Debug, Clone)]
pub struct FsStorage {
    temp_dir: PathBuf,
}

impl FsStorage {
    /// 创建存储服务
    ///
    /// # 参数
    /// * `temp_dir` - 临时副本目录，首次复制时创建
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    fn resolve(uri: &str) -> Result<PathBuf> {
        match uri_to_path(uri) {
            Some(path) => Ok(path),
            None => bail!("不支持的 URI: {}", uri),
        }
    }
}

#[async_trait]
impl LocalStorage for FsStorage {
    async fn stat_file(&self, uri: &str) -> Result<FileStat> {
        let path = Self::resolve(uri)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .context(format!("无法获取文件信息: {:?}", path))?;

        if !metadata.is_file() {
            bail!("不是文件: {:?}", path);
        }

        Ok(FileStat::readable(path, metadata.len()))
    }

    async fn read_range(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let mut file =
                std::fs::File::open(&path).context(format!("无法打开文件: {:?}", path))?;
            file.seek(SeekFrom::Start(offset))?;

            let mut buffer = vec![0u8; length as usize];
            file.read_exact(&mut buffer)
                .context(format!("读取文件失败: {:?}, offset={}, length={}", path, offset, length))?;

            Ok(buffer)
        })
        .await?
    }

    async fn copy_to_temp(&self, uri: &str) -> Result<PathBuf> {
        let source = Self::resolve(uri)?;
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .context(format!("无法创建临时目录: {:?}", self.temp_dir))?;

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());
        let target = self
            .temp_dir
            .join(format!("{}_{}", uuid::Uuid::new_v4().simple(), file_name));

        tokio::fs::copy(&source, &target)
            .await
            .context(format!("复制到临时目录失败: {:?} -> {:?}", source, target))?;

        info!("已暂存临时副本: {:?} -> {:?}", source, target);
        Ok(target)
    }

    async fn delete_local(&self, uri: &str) -> Result<()> {
        let path = Self::resolve(uri)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("已删除本地文件: {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("本地文件已不存在: {:?}", path);
                Ok(())
            }
            Err(e) => Err(e).context(format!("删除本地文件失败: {:?}", path)),
        }
    }
}
