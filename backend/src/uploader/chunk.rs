// 上传分片规划
//
// 把文件切成连续、不重叠、按序号排列的分片。
// 分片完成顺序可以乱序，但合并时必须按序号顺序提交 block_list。

use crate::config::VipType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MB: u64 = 1024 * 1024;

/// 最小分片大小（百度要求除最后一片外不小于 4MB）
pub const MIN_UPLOAD_CHUNK_SIZE: u64 = 4 * MB;

/// 自动分片大小的调整步长
pub const CHUNK_SIZE_STEP: u64 = MB;

/// 单个文件最多分片数
pub const MAX_CHUNK_COUNT: u64 = 2048;

/// 自动模式下每个上传线程的目标分片数
pub const CHUNKS_PER_THREAD: u64 = 4;

/// 上传分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    /// 分片序号（partseq）
    pub index: usize,
    /// 在文件中的起始偏移
    pub offset: u64,
    /// 分片大小
    pub size: u64,
    /// 是否已上传
    pub uploaded: bool,
}

/// 分片计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    total_size: u64,
    part_size: u64,
    chunks: Vec<UploadChunk>,
}

impl ChunkPlan {
    /// 按固定分片大小切分
    fn build(total_size: u64, part_size: u64) -> Self {
        if total_size == 0 {
            return Self {
                total_size,
                part_size,
                chunks: vec![UploadChunk {
                    index: 0,
                    offset: 0,
                    size: 0,
                    uploaded: false,
                }],
            };
        }

        let count = total_size.div_ceil(part_size);
        let chunks = (0..count)
            .map(|i| {
                let offset = i * part_size;
                UploadChunk {
                    index: i as usize,
                    offset,
                    size: part_size.min(total_size - offset),
                    uploaded: false,
                }
            })
            .collect();

        Self {
            total_size,
            part_size,
            chunks,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn chunks(&self) -> &[UploadChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 未上传的分片（按序号）
    pub fn pending(&self) -> Vec<UploadChunk> {
        self.chunks.iter().filter(|c| !c.uploaded).cloned().collect()
    }

    /// 标记分片已上传
    pub fn mark_uploaded(&mut self, index: usize) -> bool {
        match self.chunks.get_mut(index) {
            Some(chunk) => {
                chunk.uploaded = true;
                true
            }
            None => false,
        }
    }

    /// 只保留服务端仍需要的分片为未上传状态
    pub fn retain_pending(&mut self, needed: &[usize]) {
        for chunk in &mut self.chunks {
            chunk.uploaded = !needed.contains(&chunk.index);
        }
    }

    pub fn uploaded_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.uploaded).count()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.uploaded)
            .map(|c| c.size)
            .sum()
    }

    /// 是否全部上传完成
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.uploaded)
    }
}

/// 分片规划器
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    /// 自动模式下的分片大小上限
    max_part_size: u64,
    /// 低带宽模式
    low_bandwidth: bool,
}

impl ChunkPlanner {
    pub fn new(vip_type: VipType, low_bandwidth: bool) -> Self {
        Self {
            max_part_size: vip_type.max_slice_size().max(MIN_UPLOAD_CHUNK_SIZE),
            low_bandwidth,
        }
    }

    /// 生成分片计划
    ///
    /// # 参数
    /// * `total_size` - 文件大小
    /// * `part_size_hint` - 自定义分片大小，0 表示自动
    /// * `thread_count` - 上传线程数
    pub fn plan(&self, total_size: u64, part_size_hint: u64, thread_count: usize) -> ChunkPlan {
        let part_size = self.part_size_for(total_size, part_size_hint, thread_count);
        let plan = ChunkPlan::build(total_size, part_size);

        debug!(
            "分片计划: 文件大小={}, 分片大小={}, 分片数={}",
            total_size,
            part_size,
            plan.len()
        );

        plan
    }

    /// 计算分片大小
    pub fn part_size_for(&self, total_size: u64, part_size_hint: u64, thread_count: usize) -> u64 {
        if part_size_hint > 0 {
            if part_size_hint > self.max_part_size {
                warn!(
                    "自定义分片大小 {} 超过当前账号上限 {}，服务端可能拒绝",
                    part_size_hint, self.max_part_size
                );
            }
            return part_size_hint;
        }

        let mut size = if self.low_bandwidth {
            // 从最小分片开始逐步增大，直到分片数不超过上限
            let mut size = MIN_UPLOAD_CHUNK_SIZE;
            while size < self.max_part_size && total_size.div_ceil(size) > MAX_CHUNK_COUNT {
                size += CHUNK_SIZE_STEP;
            }
            size
        } else {
            let threads = thread_count.clamp(1, 32) as u64;
            let target = threads * CHUNKS_PER_THREAD;
            round_up(total_size.div_ceil(target), CHUNK_SIZE_STEP)
                .clamp(MIN_UPLOAD_CHUNK_SIZE, self.max_part_size)
        };

        // 超大文件：突破上限以保证分片数不超过 MAX_CHUNK_COUNT
        if total_size.div_ceil(size) > MAX_CHUNK_COUNT {
            let required = round_up(total_size.div_ceil(MAX_CHUNK_COUNT), CHUNK_SIZE_STEP);
            warn!(
                "文件过大 ({} bytes)，分片大小由 {} 调整为 {}",
                total_size, size, required
            );
            size = required;
        }

        size
    }
}

fn round_up(value: u64, step: u64) -> u64 {
    value.div_ceil(step).max(1) * step
}
