// 上传会话
//
// 一次文件上传的完整流程：
// 1. 规划分片并计算校验值
// 2. 断点续传或预上传（precreate），秒传直接完成
// 3. 获取上传地址
// 4. 线程池并发上传分片
// 5. 全部成功后合并分片（create），只调用一次

use crate::config::UploadConfig;
use crate::netdisk::{
    CreateFileRequest, PcsError, PrecreateRequest, SliceUploadRequest, UploadApi,
    UploadErrorKind,
};
use crate::uploader::{
    compute_file_hashes, read_chunk_data, ChunkPlanner, EndpointResolver, RetryController,
    TransferWorkerPool, UploadChunk, UploadError, UploadProgress, UploadProgressStore,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 开放平台应用凭据（仅用于认证失败时提示）
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// 上传目标
#[derive(Clone)]
pub struct UploadTarget {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 网盘目标路径
    pub remote_path: String,
    /// 文件大小
    pub total_size: u64,
    /// access token
    pub access_token: String,
    /// 应用凭据
    pub credentials: Option<ClientCredentials>,
}

impl std::fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTarget")
            .field("local_path", &self.local_path)
            .field("remote_path", &self.remote_path)
            .field("total_size", &self.total_size)
            .field("access_token", &mask_token(&self.access_token))
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl UploadTarget {
    pub fn new(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        total_size: u64,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            total_size,
            access_token: access_token.into(),
            credentials: None,
        }
    }

    /// 读取本地文件大小创建上传目标
    pub async fn from_local_file(
        local_path: &Path,
        remote_path: impl Into<String>,
        access_token: impl Into<String>,
    ) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("不是文件: {:?}", local_path),
            ));
        }

        Ok(Self::new(
            local_path,
            remote_path,
            metadata.len(),
            access_token,
        ))
    }

    pub fn with_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// access token 日志脱敏
pub(crate) fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}...", prefix)
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// 已创建，尚未运行
    Created,
    /// 分片规划、校验值计算、预上传
    Preparing,
    /// 上传分片中
    Uploading,
    /// 合并分片中
    Finalizing,
    /// 已完成
    Committed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// 会话句柄
///
/// 可以克隆到其他任务中用于取消或查询状态
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    target: Arc<UploadTarget>,
    cancel: CancellationToken,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// 取消会话
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("取消上传会话: {}", self.id);
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 推进状态，终态不可再变
    fn advance(&self, next: SessionState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            debug!("会话 {} 状态: {:?} -> {:?}", self.id, *state, next);
            *state = next;
        }
    }
}

/// 上传完成结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub fs_id: u64,
    pub path: String,
    pub size: u64,
    pub md5: String,
    /// 是否秒传
    pub rapid: bool,
}

/// 文件上传器
///
/// 同一个上传器可以并发运行多个会话，所有会话共享上传地址缓存。
#[derive(Clone)]
pub struct Uploader {
    api: Arc<dyn UploadApi>,
    resolver: EndpointResolver,
    planner: ChunkPlanner,
    config: UploadConfig,
    retry: RetryController,
    progress: Arc<UploadProgressStore>,
}

impl Uploader {
    pub fn new(api: Arc<dyn UploadApi>, config: UploadConfig) -> Self {
        let resolver = EndpointResolver::new(api.clone(), config.endpoint_settings());
        Self::with_resolver(api, resolver, config)
    }

    /// 使用外部的上传地址解析器（多个上传器共享缓存）
    pub fn with_resolver(
        api: Arc<dyn UploadApi>,
        resolver: EndpointResolver,
        config: UploadConfig,
    ) -> Self {
        Self {
            planner: ChunkPlanner::new(config.vip_type, config.low_bandwidth_upload_mode),
            retry: RetryController::new(config.retry_policy()),
            progress: Arc::new(UploadProgressStore::new()),
            api,
            resolver,
            config,
        }
    }

    pub fn with_progress_store(mut self, progress: Arc<UploadProgressStore>) -> Self {
        self.progress = progress;
        self
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub fn progress_store(&self) -> &Arc<UploadProgressStore> {
        &self.progress
    }

    /// 创建会话
    pub fn start(&self, target: UploadTarget) -> SessionHandle {
        let handle = SessionHandle {
            id: Uuid::new_v4().to_string(),
            target: Arc::new(target),
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(SessionState::Created)),
        };

        info!(
            "创建上传会话: id={}, {:?} -> {}, 大小={}, token={}",
            handle.id,
            handle.target.local_path,
            handle.target.remote_path,
            handle.target.total_size,
            mask_token(&handle.target.access_token)
        );

        handle
    }

    /// 创建并运行会话
    pub async fn upload(&self, target: UploadTarget) -> Result<CommitResult, UploadError> {
        let handle = self.start(target);
        self.run(&handle).await
    }

    /// 运行会话（每个会话只能运行一次）
    pub async fn run(&self, handle: &SessionHandle) -> Result<CommitResult, UploadError> {
        {
            let mut state = handle.state.lock();
            if *state != SessionState::Created {
                return Err(UploadError::InvalidState(format!(
                    "会话 {} 当前状态为 {:?}，不能再次运行",
                    handle.id, *state
                )));
            }
            *state = SessionState::Preparing;
        }

        let result = self.run_session(handle).await;

        match &result {
            Ok(commit) => {
                handle.advance(SessionState::Committed);
                info!(
                    "上传完成: {} (fs_id={}, 秒传={})",
                    commit.path, commit.fs_id, commit.rapid
                );
            }
            Err(UploadError::Cancelled) => {
                handle.advance(SessionState::Cancelled);
                info!("上传已取消: {}", handle.target.remote_path);
            }
            Err(e) => {
                handle.advance(SessionState::Failed);
                warn!("上传失败: {}: {}", handle.target.remote_path, e);

                if let (UploadError::AuthFailed(_), Some(credentials)) =
                    (e, handle.target.credentials.as_ref())
                {
                    warn!(
                        "access token 已失效，请使用应用 {} 重新授权",
                        credentials.client_id
                    );
                }
            }
        }

        result
    }

    async fn run_session(&self, handle: &SessionHandle) -> Result<CommitResult, UploadError> {
        let target = handle.target.clone();
        let cancel = handle.cancel.clone();

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let threads = self.config.effective_threads();
        let mut plan = self.planner.plan(
            target.total_size,
            self.config.custom_upload_part_size,
            threads,
        );

        let hashes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = compute_file_hashes(&target.local_path, &plan) => r?,
        };
        debug!(
            "校验值计算完成: content-md5={}, 分片数={}",
            hashes.content_md5,
            hashes.block_list.len()
        );

        let progress_key = UploadProgressStore::key(&target.remote_path, &hashes.content_md5);
        let saved = self.progress.take(&progress_key).filter(|p| {
            p.part_size == plan.part_size()
                && p.total_size == target.total_size
                && p.block_list == hashes.block_list
        });

        let upload_id = match saved {
            Some(saved) => {
                info!(
                    "断点续传: uploadid={}, 剩余分片 {}/{}",
                    saved.upload_id,
                    saved.pending.len(),
                    plan.len()
                );
                plan.retain_pending(&saved.pending);
                saved.upload_id
            }
            None => {
                let req = PrecreateRequest {
                    path: target.remote_path.clone(),
                    size: target.total_size,
                    block_list: hashes.block_list.clone(),
                    content_md5: hashes.content_md5.clone(),
                    slice_md5: hashes.slice_md5.clone(),
                };
                let api = &self.api;
                let token = target.access_token.as_str();
                let req_ref = &req;

                let precreate = self
                    .retry
                    .execute("预上传", &cancel, move |_| api.precreate(token, req_ref))
                    .await
                    .map_err(UploadError::from_init)?;

                if precreate.is_rapid() {
                    info!("秒传成功: {}", target.remote_path);
                    let info = precreate.info.unwrap_or_default();
                    return Ok(CommitResult {
                        fs_id: info.fs_id,
                        path: non_empty_or(info.path, &target.remote_path),
                        size: target.total_size,
                        md5: non_empty_or(info.md5, &hashes.content_md5),
                        rapid: true,
                    });
                }

                // block_list 为空时视为全部分片都需要上传
                if !precreate.block_list.is_empty() {
                    plan.retain_pending(&precreate.block_list);
                }
                precreate.uploadid
            }
        };

        handle.advance(SessionState::Uploading);

        let endpoint = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            r = self.resolver.resolve(&target.access_token) => r?,
        };
        info!(
            "开始上传分片: 上传地址={}, 待上传 {}/{}, 分片大小={}",
            endpoint.base_url,
            plan.pending().len(),
            plan.len(),
            plan.part_size()
        );

        let ctx = Arc::new(ChunkContext {
            api: self.api.clone(),
            resolver: self.resolver.clone(),
            retry: self.retry.clone(),
            local_path: target.local_path.clone(),
            remote_path: target.remote_path.clone(),
            access_token: target.access_token.clone(),
            upload_id: upload_id.clone(),
            block_list: hashes.block_list.clone(),
        });

        let pool = TransferWorkerPool::new(threads);
        let chunk_cancel = cancel.clone();
        let report = pool
            .submit(plan.pending(), cancel.clone(), move |chunk| {
                let ctx = ctx.clone();
                let cancel = chunk_cancel.clone();
                async move { ctx.upload_chunk(chunk, &cancel).await }
            })
            .await;

        for (index, _) in &report.completed {
            plan.mark_uploaded(*index);
        }

        if cancel.is_cancelled() || !report.interrupted.is_empty() {
            let pending: Vec<usize> = plan.pending().iter().map(|c| c.index).collect();
            info!(
                "保存断点续传记录: {} (剩余分片 {})",
                target.remote_path,
                pending.len()
            );
            self.progress.save(
                progress_key,
                UploadProgress {
                    upload_id,
                    part_size: plan.part_size(),
                    total_size: target.total_size,
                    pending,
                    block_list: hashes.block_list,
                    saved_at: chrono::Utc::now().timestamp(),
                },
            );
            return Err(UploadError::Cancelled);
        }

        let unassigned = report.unassigned;
        if let Some((index, err)) = report.failures.into_iter().next() {
            warn!(
                "分片 #{} 失败，放弃合并 (未领取分片 {})",
                index, unassigned
            );
            return Err(err);
        }

        if let Some(e) = report.worker_errors.first() {
            return Err(UploadError::Internal(format!("上传线程异常退出: {}", e)));
        }

        if !plan.is_complete() {
            return Err(UploadError::Internal(format!(
                "分片未全部完成: {}/{}",
                plan.uploaded_count(),
                plan.len()
            )));
        }

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        handle.advance(SessionState::Finalizing);
        self.finalize(&target, upload_id, plan.len(), hashes.block_list)
            .await
            .inspect(|_| self.progress.remove(&progress_key))
    }

    /// 合并分片
    ///
    /// 服务端可能已经提交成功，失败时不自动重试
    async fn finalize(
        &self,
        target: &UploadTarget,
        upload_id: String,
        chunk_count: usize,
        block_list: Vec<String>,
    ) -> Result<CommitResult, UploadError> {
        let req = CreateFileRequest {
            path: target.remote_path.clone(),
            size: target.total_size,
            upload_id,
            chunk_count,
            block_list,
        };

        info!("合并分片: {} (分片数={})", req.path, chunk_count);

        let timeout = self.retry.policy().attempt_timeout;
        let created = match tokio::time::timeout(
            timeout,
            self.api.create_file(&target.access_token, &req),
        )
        .await
        {
            Ok(r) => r.map_err(UploadError::from_finalize)?,
            Err(_) => {
                return Err(UploadError::FinalizeFailed(PcsError::new(
                    UploadErrorKind::Timeout,
                    format!("合并请求超时 ({:?})", timeout),
                )))
            }
        };

        Ok(CommitResult {
            fs_id: created.fs_id,
            path: non_empty_or(created.path, &target.remote_path),
            size: target.total_size,
            md5: created.md5,
            rapid: false,
        })
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// 单个会话内所有分片共享的上传参数
struct ChunkContext {
    api: Arc<dyn UploadApi>,
    resolver: EndpointResolver,
    retry: RetryController,
    local_path: PathBuf,
    remote_path: String,
    access_token: String,
    upload_id: String,
    block_list: Vec<String>,
}

impl ChunkContext {
    /// 上传单个分片，返回分片 MD5
    async fn upload_chunk(
        &self,
        chunk: UploadChunk,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let payload = read_chunk_data(&self.local_path, chunk.offset, chunk.size).await?;
        let req = SliceUploadRequest {
            path: self.remote_path.clone(),
            upload_id: self.upload_id.clone(),
            partseq: chunk.index,
            offset: chunk.offset,
            payload: Bytes::from(payload),
        };

        let api = &self.api;
        let resolver = &self.resolver;
        let token = self.access_token.as_str();
        let req = &req;
        let op_name = format!("分片 #{}", chunk.index);

        let md5 = self
            .retry
            .execute(&op_name, cancel, move |_| async move {
                // 每次尝试都重新取地址，失效后会拿到新地址
                // 地址不可用时直接终止会话，不消耗重试次数
                let endpoint = resolver.resolve(token).await.map_err(|e| match e {
                    UploadError::EndpointUnavailable(msg) => {
                        PcsError::new(UploadErrorKind::EndpointUnavailable, msg)
                    }
                    other => PcsError::new(UploadErrorKind::EndpointUnavailable, other.to_string()),
                })?;

                match api.upload_slice(&endpoint.base_url, token, req).await {
                    Ok(resp) => {
                        resolver.report_success();
                        Ok::<String, PcsError>(resp.md5)
                    }
                    Err(e) => {
                        if e.kind.is_connection_class() {
                            resolver.report_failure(&endpoint);
                        }
                        Err(e)
                    }
                }
            })
            .await
            .map_err(|e| UploadError::from_chunk(chunk.index, e))?;

        if let Some(expected) = self.block_list.get(chunk.index) {
            if !md5.eq_ignore_ascii_case(expected) {
                warn!(
                    "分片 #{} 服务端 MD5 ({}) 与本地 ({}) 不一致",
                    chunk.index, md5, expected
                );
            }
        }

        Ok(md5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("121.abcdefghijk"), "121.ab...");
        assert_eq!(mask_token("abc"), "abc...");
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Uploading.is_terminal());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let target = UploadTarget::new("/tmp/a", "/apps/a", 1, "secret-token").with_credentials(
            ClientCredentials {
                client_id: "app-id".to_string(),
                client_secret: "app-secret".to_string(),
            },
        );
        let printed = format!("{:?}", target);

        assert!(printed.contains("app-id"));
        assert!(!printed.contains("app-secret"));
        assert!(!printed.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_from_local_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let target = UploadTarget::from_local_file(&path, "/apps/a.bin", "token")
            .await
            .unwrap();
        assert_eq!(target.total_size, 5);

        assert!(UploadTarget::from_local_file(dir.path(), "/apps/x", "token")
            .await
            .is_err());
    }
}
