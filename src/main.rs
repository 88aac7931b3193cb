use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use media_uploader::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging,
    uploader::FolderScanner,
    EnvTokenProvider, FsMediaLibrary, FsStorage, HttpMediaApi, LogNotifier, SessionSummary,
    StaticTokenProvider, TokenProvider, UploadEvent, UploadManager,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// 在日志初始化之前单独读取日志配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(DEFAULT_CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

fn token_provider(config: &AppConfig) -> Arc<dyn TokenProvider> {
    match &config.api.token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => {
            info!("从环境变量读取认证令牌: {}", config.api.token_env);
            Arc::new(EnvTokenProvider::new(config.api.token_env.clone()))
        }
    }
}

/// 扫描并上传，返回所有会话的汇总
async fn upload_paths(
    config: &AppConfig,
    api: Arc<HttpMediaApi>,
    paths: &[PathBuf],
) -> Result<SessionSummary> {
    let storage = FsStorage::new(config.upload.temp_dir.clone());
    let manager = UploadManager::from_config(
        config,
        api,
        Arc::new(storage),
        Arc::new(FsMediaLibrary::new()),
        Arc::new(LogNotifier),
    );

    let items = FolderScanner::new().scan_items(paths)?;
    if items.is_empty() {
        warn!("没有找到可上传的媒体文件");
        return Ok(SessionSummary::default());
    }

    // 收集会话汇总
    let mut events = manager.subscribe();
    let collector = tokio::spawn(async move {
        let mut total = SessionSummary::default();
        loop {
            match events.recv().await {
                Ok(UploadEvent::SessionCompleted(summary)) => {
                    total.succeeded += summary.succeeded;
                    total.duplicate += summary.duplicate;
                    total.failed += summary.failed;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        total
    });

    manager.enqueue(items);

    tokio::select! {
        _ = manager.wait_until_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，取消上传...");
            manager.cancel_all();
            manager.wait_until_idle().await;
        }
    }

    // 释放管理器后事件通道关闭，汇总任务随之结束
    drop(manager);
    collector.await.context("汇总任务异常退出")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let log_config = load_log_config().await;
    let mut log_guard = logging::init_logging(&log_config);

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        anyhow::bail!("用法: media-uploader <文件或文件夹>...");
    }

    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;
    info!("上传服务地址: {}", config.api.base_url);

    let api = Arc::new(
        HttpMediaApi::new(&config.api, token_provider(&config)).context("创建上传客户端失败")?,
    );
    let remote_log = log_guard.start_remote(api.clone());

    let result = upload_paths(&config, api, &paths).await;
    info!("应用已退出");

    // 退出前发送剩余日志
    if let Some(remote_log) = remote_log {
        remote_log.shutdown().await;
    }

    let summary = result?;
    if summary.failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
