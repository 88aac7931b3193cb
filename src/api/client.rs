// 上传接口客户端实现

use crate::api::{
    ApiError, ChunkUploadRequest, ClientLogBatch, CompleteUploadRequest, ServerStatus,
    SingleShotFile, StatusResponse, CLIENT_LOG_PATH, UPLOAD_CHUNK_PATH, UPLOAD_COMPLETE_PATH,
    UPLOAD_PATH,
};
use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use reqwest::{multipart, Client, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 单次上传时轮询已发送字节数的间隔
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 上传接口
///
/// 每个方法对应一次 HTTP 请求，不做任何重试
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// 单次上传整个文件，`on_progress(已发送字节, 总字节)`
    async fn upload_single(
        &self,
        file: &SingleShotFile,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<ServerStatus, ApiError>;

    /// 上传一个分片
    async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        data: Vec<u8>,
    ) -> Result<(), ApiError>;

    /// 通知服务端合并分片
    async fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> Result<ServerStatus, ApiError>;
}

/// 日志上报接口
#[async_trait]
pub trait LogSink: Send + Sync {
    /// 发送一批日志，失败时由调用方决定是否重发
    async fn send_logs(&self, batch: &ClientLogBatch) -> Result<(), ApiError>;
}

/// 基于 reqwest 的上传客户端
#[derive(Clone)]
pub struct HttpMediaApi {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    single_shot_timeout: Duration,
    chunk_timeout: Duration,
    finalize_timeout: Duration,
    multipart_field: String,
}

impl HttpMediaApi {
    /// 创建上传客户端
    ///
    /// # 参数
    /// * `config` - 接口配置
    /// * `tokens` - Bearer Token 提供者
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        // 超时按请求单独设置，这里只限制建连时间
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        info!("初始化上传客户端: base_url={}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            single_shot_timeout: config.single_shot_timeout(),
            chunk_timeout: config.chunk_timeout(),
            finalize_timeout: config.finalize_timeout(),
            multipart_field: config.multipart_field.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 每次请求前重新获取 Token，缺失时立即失败
    async fn bearer(&self) -> Result<String, ApiError> {
        match self.tokens.get_auth_token().await {
            Some(token) => Ok(token),
            None => {
                warn!("未获取到认证令牌，放弃请求");
                Err(ApiError::MissingToken)
            }
        }
    }

    /// 非 2xx 响应转为错误
    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// 解析 `{status}` 响应体
    async fn read_status(response: Response) -> Result<ServerStatus, ApiError> {
        let text = response.text().await.map_err(ApiError::from_reqwest)?;
        let parsed: StatusResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: body={}", e, text)))?;
        Ok(parsed.server_status())
    }
}

#[async_trait]
impl MediaApi for HttpMediaApi {
    async fn upload_single(
        &self,
        file: &SingleShotFile,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<ServerStatus, ApiError> {
        let token = self.bearer().await?;

        info!(
            "单次上传: file={}, size={}, mime={}",
            file.file_name, file.size, file.mime_type
        );

        let handle = tokio::fs::File::open(&file.path).await?;

        // 通过包装请求体流统计已发送字节
        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();
        let stream = ReaderStream::new(handle).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            chunk
        });

        let part = multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), file.size)
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ApiError::InvalidResponse(format!("无效的 MIME 类型: {}", e)))?;
        let form = multipart::Form::new().part(self.multipart_field.clone(), part);

        let request = self
            .client
            .post(self.endpoint(UPLOAD_PATH))
            .bearer_auth(token)
            .timeout(self.single_shot_timeout)
            .multipart(form)
            .send();
        tokio::pin!(request);

        let mut ticker = tokio::time::interval(PROGRESS_POLL_INTERVAL);
        let response = loop {
            tokio::select! {
                result = &mut request => break result.map_err(ApiError::from_reqwest)?,
                _ = ticker.tick() => on_progress(sent.load(Ordering::Relaxed), file.size),
            }
        };
        on_progress(sent.load(Ordering::Relaxed), file.size);

        let response = Self::ensure_success(response).await?;
        let status = Self::read_status(response).await?;

        debug!("单次上传响应: file={}, status={:?}", file.file_name, status);
        Ok(status)
    }

    async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        data: Vec<u8>,
    ) -> Result<(), ApiError> {
        let token = self.bearer().await?;

        debug!(
            "上传分片: uploadid={}..., index={}, size={}",
            &upload_id[..8.min(upload_id.len())],
            chunk_index,
            data.len()
        );

        let body = ChunkUploadRequest {
            upload_id: upload_id.to_string(),
            chunk_index,
            file_chunk: STANDARD.encode(&data),
        };

        let response = self
            .client
            .post(self.endpoint(UPLOAD_CHUNK_PATH))
            .bearer_auth(token)
            .timeout(self.chunk_timeout)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> Result<ServerStatus, ApiError> {
        let token = self.bearer().await?;

        info!(
            "合并分片: uploadid={}, file={}",
            request.upload_id, request.filename
        );

        let response = self
            .client
            .post(self.endpoint(UPLOAD_COMPLETE_PATH))
            .bearer_auth(token)
            .timeout(self.finalize_timeout)
            .json(request)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let response = Self::ensure_success(response).await?;
        Self::read_status(response).await
    }
}

#[async_trait]
impl LogSink for HttpMediaApi {
    // 这里不能打日志，否则上报请求本身又会产生待上报的日志
    async fn send_logs(&self, batch: &ClientLogBatch) -> Result<(), ApiError> {
        let mut request = self
            .client
            .post(self.endpoint(CLIENT_LOG_PATH))
            .timeout(self.chunk_timeout)
            .json(batch);

        // 日志上报不要求令牌，有就带上
        if let Some(token) = self.tokens.get_auth_token().await {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}
