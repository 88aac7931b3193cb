//! 本地媒体扫描模块
//!
//! 负责:
//! - 递归扫描本地文件夹中的图片和视频
//! - 根据扩展名推断 MIME 类型
//! - 生成待入队的上传条目

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::filesystem::FILE_URI_PREFIX;

use super::item::UploadItem;

/// 扩展名 → MIME 类型
const MEDIA_MIME_TYPES: [(&str, &str); 14] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("bmp", "image/bmp"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
    ("m4v", "video/x-m4v"),
    ("3gp", "video/3gpp"),
];

/// 根据扩展名查找 MIME 类型，不是媒体文件时返回 None
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    MEDIA_MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

/// 本地路径转 `file://` URI
pub fn path_to_uri(path: &Path) -> String {
    format!("{}{}", FILE_URI_PREFIX, path.display())
}

/// 文件扫描结果
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 文件大小（字节）
    pub size: u64,
    pub mime_type: &'static str,
}

impl ScannedFile {
    /// 转换为上传条目
    pub fn into_item(self) -> UploadItem {
        let display_name = self
            .local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        UploadItem::new(path_to_uri(&self.local_path), display_name, self.mime_type)
            .with_size(self.size)
    }
}

/// 扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 最大文件数量，超过此数量将停止扫描
    pub max_files: Option<usize>,
    /// 跳过隐藏文件（以.开头的文件和文件夹）
    pub skip_hidden: bool,
}

/// 媒体扫描器
#[derive(Default)]
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 扫描单个文件或文件夹
    ///
    /// 结果按路径排序；非媒体文件被跳过
    pub fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Vec<ScannedFile>> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            anyhow::bail!("扫描路径不存在: {}", root_path.display());
        }

        info!("开始扫描: {}", root_path.display());

        let skip_hidden = self.options.skip_hidden;
        let walker = WalkDir::new(root_path)
            .follow_links(self.options.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                // 根路径本身不过滤
                !(skip_hidden
                    && entry.depth() > 0
                    && entry.file_name().to_string_lossy().starts_with('.'))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("读取目录条目失败: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(mime_type) = mime_type_for(path) else {
                debug!("跳过非媒体文件: {}", path.display());
                continue;
            };

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("读取文件元数据失败: {}, 错误: {}", path.display(), e);
                    continue;
                }
            };

            debug!("扫描到文件: {} ({})", path.display(), format_bytes(size));
            files.push(ScannedFile {
                local_path: path.to_path_buf(),
                size,
                mime_type,
            });

            if let Some(max_files) = self.options.max_files {
                if files.len() >= max_files {
                    warn!("已达到最大文件数量限制 ({}), 停止扫描", max_files);
                    break;
                }
            }
        }

        info!(
            "扫描完成: {} 个媒体文件，总大小 {}",
            files.len(),
            format_bytes(files.iter().map(|f| f.size).sum())
        );

        Ok(files)
    }

    /// 扫描多个路径并生成上传条目
    pub fn scan_items<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<UploadItem>> {
        let mut items = Vec::new();
        for path in paths {
            items.extend(self.scan(path)?.into_iter().map(ScannedFile::into_item));
        }
        Ok(items)
    }
}

/// 辅助函数：格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
