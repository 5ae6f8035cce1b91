//! 分片上传工作线程池
//!
//! 固定数量的工作任务从共享队列中领取分片。第一个分片失败（重试用尽或致命错误）
//! 后设置停止标记：不再领取新分片，已在上传中的分片继续完成。
//! 外部取消通过 [`CancellationToken`] 传入，正在上传的分片会被立即中断。

use crate::config::{MAX_UPLOAD_THREADS, MIN_UPLOAD_THREADS};
use crate::uploader::{UploadChunk, UploadError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 线程池执行结果
#[derive(Debug, Default)]
pub struct PoolReport {
    /// 成功的分片 (序号, MD5)，按完成顺序
    pub completed: Vec<(usize, String)>,
    /// 失败的分片，按完成顺序
    pub failures: Vec<(usize, UploadError)>,
    /// 被取消中断的分片序号
    pub interrupted: Vec<usize>,
    /// 从未被领取的分片数
    pub unassigned: usize,
    /// 异常退出的工作任务
    pub worker_errors: Vec<String>,
}

impl PoolReport {
    /// 所有分片都成功
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
            && self.interrupted.is_empty()
            && self.worker_errors.is_empty()
            && self.unassigned == 0
    }

    /// 第一个失败的分片
    pub fn first_failure(&self) -> Option<&(usize, UploadError)> {
        self.failures.first()
    }
}

/// 分片上传线程池
#[derive(Debug, Clone, Copy)]
pub struct TransferWorkerPool {
    threads: usize,
}

impl TransferWorkerPool {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.clamp(MIN_UPLOAD_THREADS, MAX_UPLOAD_THREADS),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// 上传一批分片，所有工作任务结束后返回
    ///
    /// `upload_fn` 返回分片的 MD5；返回 `UploadError::Cancelled` 的分片记为中断，
    /// 其余错误触发停止标记。
    pub async fn submit<F, Fut>(
        &self,
        chunks: Vec<UploadChunk>,
        cancel: CancellationToken,
        upload_fn: F,
    ) -> PoolReport
    where
        F: Fn(UploadChunk) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, UploadError>> + Send + 'static,
    {
        if chunks.is_empty() {
            return PoolReport::default();
        }

        let workers = self.threads.min(chunks.len());
        info!("启动 {} 个上传线程，共 {} 个分片", workers, chunks.len());

        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
        let stop = Arc::new(AtomicBool::new(false));
        let report = Arc::new(Mutex::new(PoolReport::default()));
        let upload_fn = Arc::new(upload_fn);

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let queue = queue.clone();
            let stop = stop.clone();
            let report = report.clone();
            let cancel = cancel.clone();
            let upload_fn = upload_fn.clone();

            set.spawn(async move {
                Self::worker_loop(worker_id, queue, stop, report, cancel, upload_fn).await;
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("上传线程异常退出: {}", e);
                stop.store(true, Ordering::SeqCst);
                report.lock().worker_errors.push(e.to_string());
            }
        }

        let mut report = std::mem::take(&mut *report.lock());
        report.unassigned = queue.lock().len();

        debug!(
            "上传线程全部结束: 成功={}, 失败={}, 中断={}, 未领取={}",
            report.completed.len(),
            report.failures.len(),
            report.interrupted.len(),
            report.unassigned
        );

        report
    }

    async fn worker_loop<F, Fut>(
        worker_id: usize,
        queue: Arc<Mutex<VecDeque<UploadChunk>>>,
        stop: Arc<AtomicBool>,
        report: Arc<Mutex<PoolReport>>,
        cancel: CancellationToken,
        upload_fn: Arc<F>,
    ) where
        F: Fn(UploadChunk) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, UploadError>> + Send + 'static,
    {
        loop {
            if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                debug!("[上传线程{}] 收到停止信号，不再领取分片", worker_id);
                break;
            }

            let Some(chunk) = queue.lock().pop_front() else {
                break;
            };
            let index = chunk.index;

            debug!(
                "[上传线程{}] 分片 #{} 开始上传 (偏移: {}, 大小: {} bytes)",
                worker_id, index, chunk.offset, chunk.size
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                r = upload_fn(chunk) => r,
            };

            match result {
                Ok(md5) => {
                    debug!("[上传线程{}] 分片 #{} 上传完成", worker_id, index);
                    report.lock().completed.push((index, md5));
                }
                Err(UploadError::Cancelled) => {
                    info!("[上传线程{}] 分片 #{} 因任务取消而中断", worker_id, index);
                    report.lock().interrupted.push(index);
                }
                Err(e) => {
                    warn!("[上传线程{}] 分片 #{} 上传失败: {}", worker_id, index, e);
                    stop.store(true, Ordering::SeqCst);
                    report.lock().failures.push((index, e));
                }
            }
        }
    }
}
