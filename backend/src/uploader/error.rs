//! 上传会话错误
//!
//! 可重试错误在重试控制器内部消化，只有用尽重试或致命错误才会以
//! [`UploadError`] 的形式在分片 / 会话边界报告一次。

use crate::netdisk::{PcsError, UploadErrorKind};
use crate::uploader::RetryError;
use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 上传地址获取失败且没有可用的备用地址
    #[error("上传地址不可用: {0}")]
    EndpointUnavailable(String),

    /// 预上传失败
    #[error("预上传失败（尝试 {attempts} 次）: {source}")]
    SessionInitFailed { attempts: u32, source: PcsError },

    /// 分片上传失败
    #[error("分片 #{index} 上传失败（尝试 {attempts} 次）: {source}")]
    ChunkUploadFailed {
        index: usize,
        attempts: u32,
        source: PcsError,
    },

    /// 创建文件失败
    #[error("合并分片失败: {0}")]
    FinalizeFailed(PcsError),

    /// access token 被拒绝
    #[error("认证失败: {0}")]
    AuthFailed(PcsError),

    /// 会话被取消
    #[error("上传已取消")]
    Cancelled,

    /// 会话状态不允许该操作
    #[error("会话状态错误: {0}")]
    InvalidState(String),

    /// 本地文件读取失败
    #[error("本地文件读取失败: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误（工作线程异常退出等）
    #[error("内部错误: {0}")]
    Internal(String),
}

impl UploadError {
    /// 从预上传的重试结果转换
    pub fn from_init(err: RetryError) -> Self {
        match err {
            RetryError::Cancelled => UploadError::Cancelled,
            other => {
                let attempts = other.attempts();
                match other.last_error().cloned() {
                    Some(e) if e.kind == UploadErrorKind::Unauthorized => UploadError::AuthFailed(e),
                    Some(e) if e.kind == UploadErrorKind::EndpointUnavailable => {
                        UploadError::EndpointUnavailable(e.message)
                    }
                    Some(source) => UploadError::SessionInitFailed { attempts, source },
                    None => UploadError::Cancelled,
                }
            }
        }
    }

    /// 从分片上传的重试结果转换
    pub fn from_chunk(index: usize, err: RetryError) -> Self {
        match err {
            RetryError::Cancelled => UploadError::Cancelled,
            other => {
                let attempts = other.attempts();
                match other.last_error().cloned() {
                    Some(e) if e.kind == UploadErrorKind::Unauthorized => UploadError::AuthFailed(e),
                    Some(e) if e.kind == UploadErrorKind::EndpointUnavailable => {
                        UploadError::EndpointUnavailable(e.message)
                    }
                    Some(source) => UploadError::ChunkUploadFailed {
                        index,
                        attempts,
                        source,
                    },
                    None => UploadError::Cancelled,
                }
            }
        }
    }

    /// 从合并请求的错误转换
    pub fn from_finalize(err: PcsError) -> Self {
        match err.kind {
            UploadErrorKind::Unauthorized => UploadError::AuthFailed(err),
            UploadErrorKind::Cancelled => UploadError::Cancelled,
            _ => UploadError::FinalizeFailed(err),
        }
    }

    /// 调用方是否可以从头重新开始整个会话
    pub fn is_session_restartable(&self) -> bool {
        match self {
            UploadError::ChunkUploadFailed { source, .. } => source.kind != UploadErrorKind::QuotaExceeded,
            UploadError::SessionInitFailed { source, .. } => source.is_retriable(),
            UploadError::EndpointUnavailable(_) | UploadError::Cancelled => true,
            _ => false,
        }
    }
}
