// 上传分片规划
//
// 按固定大小把文件切成连续、不重叠、按索引排序的分片

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::strategy::UploadStrategy;

/// 默认上传分片大小: 5MB
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// 分片描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// 分片索引（从 0 开始连续）
    pub index: usize,
    /// 起始偏移
    pub offset: u64,
    /// 分片长度（最后一片可能更短）
    pub length: u64,
    pub state: ChunkState,
    /// 已尝试次数
    pub attempt: u32,
}

impl ChunkDescriptor {
    pub fn new(index: usize, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
            state: ChunkState::Pending,
            attempt: 0,
        }
    }
}

/// 计算分片
///
/// `chunk_count = ceil(size / chunk_size)`；空文件返回一个长度为 0 的分片，
/// 以便仍然走一次完整的分片上传 + 合并流程
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
    let chunk_size = chunk_size.max(1);

    if total_size == 0 {
        return vec![ChunkDescriptor::new(0, 0, 0)];
    }

    let mut chunks = Vec::with_capacity(total_size.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    let mut index = 0;

    while offset < total_size {
        let end = std::cmp::min(offset + chunk_size, total_size);
        chunks.push(ChunkDescriptor::new(index, offset, end - offset));
        offset = end;
        index += 1;
    }

    chunks
}

/// 单个文件的上传计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPlan {
    pub strategy: UploadStrategy,
    /// 分片上传时每次尝试生成的新 ID
    pub upload_id: Option<String>,
    pub chunks: Vec<ChunkDescriptor>,
    pub total_size: u64,
}

impl UploadPlan {
    /// 生成分片计划，每次调用都会分配新的 upload_id
    pub fn chunked(total_size: u64, chunk_size: u64) -> Self {
        let chunks = plan_chunks(total_size, chunk_size);
        let upload_id = Uuid::new_v4().to_string();

        debug!(
            "创建分片计划: uploadid={}, 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            upload_id,
            total_size,
            chunk_size,
            chunks.len()
        );

        Self {
            strategy: UploadStrategy::Chunked,
            upload_id: Some(upload_id),
            chunks,
            total_size,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}
