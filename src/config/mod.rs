// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::events::DEFAULT_THROTTLE_INTERVAL_MS;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传接口配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 上传后本地文件保留策略
    #[serde(default)]
    pub retention: RetentionConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
    /// 是否把日志上报到服务端
    #[serde(default)]
    pub remote_enabled: bool,
    /// 攒够多少条立即上报
    #[serde(default = "default_remote_batch_size")]
    pub remote_batch_size: usize,
    /// 定时上报间隔（秒）
    #[serde(default = "default_remote_flush_interval_secs")]
    pub remote_flush_interval_secs: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_remote_batch_size() -> usize {
    50
}

fn default_remote_flush_interval_secs() -> u64 {
    10
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
            remote_enabled: false,
            remote_batch_size: default_remote_batch_size(),
            remote_flush_interval_secs: default_remote_flush_interval_secs(),
        }
    }
}

impl LogConfig {
    pub fn remote_flush_interval(&self) -> Duration {
        Duration::from_secs(self.remote_flush_interval_secs)
    }
}

/// 上传接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// 接口根地址，三个上传端点都挂在它下面
    pub base_url: String,
    /// 单次上传（multipart）超时（秒）
    pub single_shot_timeout_secs: u64,
    /// 单个分片上传超时（秒）
    pub chunk_timeout_secs: u64,
    /// 合并分片超时（秒）
    pub finalize_timeout_secs: u64,
    /// 建立连接超时（秒）
    pub connect_timeout_secs: u64,
    /// multipart 表单中文件字段名
    pub multipart_field: String,
    /// 固定的 Bearer Token（优先级高于环境变量）
    pub token: Option<String>,
    /// 读取 Bearer Token 的环境变量名
    pub token_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api".to_string(),
            single_shot_timeout_secs: 120,
            chunk_timeout_secs: 30,
            finalize_timeout_secs: 120,
            connect_timeout_secs: 15,
            multipart_field: "mediaFiles".to_string(),
            token: None,
            token_env: "MEDIA_UPLOAD_TOKEN".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn single_shot_timeout(&self) -> Duration {
        Duration::from_secs(self.single_shot_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 分片大小 (MB)
    pub chunk_size_mb: u64,
    /// 单次上传的文件大小上限 (MB)，达到或超过此大小改用分片上传
    pub single_shot_limit_mb: u64,
    /// 单个文件的最大并发分片数
    pub max_concurrent_chunks: usize,
    /// 单个分片的最大尝试次数（含首次）
    pub max_chunk_retries: u32,
    /// 分片重试的初始退避时间（毫秒）
    pub retry_backoff_ms: u64,
    /// 进度上报最小间隔（毫秒）
    pub progress_interval_ms: u64,
    /// 队列清空后等待多久再汇总会话（毫秒）
    pub summary_delay_ms: u64,
    /// 引擎私有临时副本目录
    pub temp_dir: PathBuf,
    /// 视为视频的扩展名（小写，不含点）
    pub video_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: 5,
            single_shot_limit_mb: 95, // 留出余量，低于上游 100MB 请求体限制
            max_concurrent_chunks: 3,
            max_chunk_retries: 3,
            retry_backoff_ms: 100,
            progress_interval_ms: DEFAULT_THROTTLE_INTERVAL_MS,
            summary_delay_ms: 2500,
            temp_dir: std::env::temp_dir().join("media-uploader"),
            video_extensions: ["mp4", "mov", "avi", "mkv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl UploadConfig {
    /// 分片大小（字节）
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb * 1024 * 1024
    }

    /// 单次上传上限（字节）
    pub fn single_shot_limit_bytes(&self) -> u64 {
        self.single_shot_limit_mb * 1024 * 1024
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn summary_delay(&self) -> Duration {
        Duration::from_millis(self.summary_delay_ms)
    }

    /// 校验上传参数
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_mb == 0 {
            anyhow::bail!("分片大小必须大于 0");
        }
        if self.max_concurrent_chunks == 0 {
            anyhow::bail!("最大并发分片数必须大于 0");
        }
        if self.max_chunk_retries == 0 {
            anyhow::bail!("分片最大尝试次数必须大于 0");
        }
        Ok(())
    }
}

/// 原始媒体文件的删除策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDeletionPolicy {
    /// 从不删除原始文件
    Keep,
    /// 上传成功后立即删除
    Automatic,
    /// 会话结束时统一请求删除（可能需要用户确认）
    #[default]
    Deferred,
}

/// 上传后保留策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// 原始文件删除策略
    pub source_deletion: SourceDeletionPolicy,
    /// 是否删除临时副本
    pub delete_temp_copies: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            source_deletion: SourceDeletionPolicy::default(),
            delete_temp_copies: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            upload: UploadConfig::default(),
            retention: RetentionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .upload
            .validate()
            .context("配置文件中的上传参数校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload
            .validate()
            .context("保存配置失败：上传参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 首次启动：写出默认配置，便于用户修改
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
