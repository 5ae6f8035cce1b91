//! 重试 / 退避控制器
//!
//! 包装单个网络操作：可重试错误按指数退避重试，致命错误立即返回。
//! 是否可重试完全由 [`UploadErrorKind::retry_disposition`] 决定。

use crate::netdisk::{PcsError, RetryDisposition, UploadErrorKind};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次请求）
    pub max_retries: u32,
    /// 初始等待
    pub base_wait: Duration,
    /// 最大等待
    pub max_wait: Duration,
    /// 单次尝试超时
    pub attempt_timeout: Duration,
    /// 是否添加 ±25% 抖动
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30 * 60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// 计算第 n 次重试前的等待（n 从 0 开始）
    pub fn backoff(&self, retry: u32, kind: UploadErrorKind) -> Duration {
        // 限流时直接等待最大时长
        if kind == UploadErrorKind::RateLimited {
            return self.max_wait;
        }

        let factor = 2u32.saturating_pow(retry);
        let delay = self.base_wait.saturating_mul(factor).min(self.max_wait);

        if self.jitter {
            let millis = delay.as_millis() as u64;
            let jitter_range = millis / 4;
            if jitter_range == 0 {
                return delay;
            }
            let jitter = rand::random::<u64>() % (jitter_range * 2);
            Duration::from_millis(millis.saturating_sub(jitter_range).saturating_add(jitter))
        } else {
            delay
        }
    }
}

/// 重试失败
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// 可重试错误已用尽重试次数
    #[error("重试 {attempts} 次后仍然失败: {last}")]
    Exhausted { attempts: u32, last: PcsError },

    /// 遇到不可重试的错误
    #[error("不可重试的错误（第 {attempts} 次尝试）: {error}")]
    Fatal { attempts: u32, error: PcsError },

    /// 操作被取消
    #[error("操作已取消")]
    Cancelled,
}

impl RetryError {
    /// 尝试次数
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => *attempts,
            RetryError::Cancelled => 0,
        }
    }

    /// 最后一次的底层错误
    pub fn last_error(&self) -> Option<&PcsError> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal { error, .. } => Some(error),
            RetryError::Cancelled => None,
        }
    }

    /// 最后一次错误的分类
    pub fn kind(&self) -> UploadErrorKind {
        self.last_error()
            .map(|e| e.kind)
            .unwrap_or(UploadErrorKind::Cancelled)
    }
}

/// 重试控制器
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行操作
    ///
    /// `op` 的参数是当前尝试序号（从 0 开始）。每次尝试受 `attempt_timeout` 限制，
    /// 取消信号在请求中和退避等待中都会被立即响应。
    pub async fn execute<T, F, Fut>(
        &self,
        op_name: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PcsError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                r = tokio::time::timeout(self.policy.attempt_timeout, op(attempt)) => r,
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!("{} 在第 {} 次重试后成功", op_name, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => PcsError::new(
                    UploadErrorKind::Timeout,
                    format!("请求超时 ({:?})", self.policy.attempt_timeout),
                ),
            };

            let attempts = attempt + 1;

            if error.kind.retry_disposition() == RetryDisposition::Fatal {
                return Err(RetryError::Fatal { attempts, error });
            }

            if attempt >= self.policy.max_retries {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }

            let wait = self.policy.backoff(attempt, error.kind);
            warn!(
                "{} 失败，等待 {}ms 后重试 ({}/{}): {}",
                op_name,
                wait.as_millis(),
                attempt + 1,
                self.policy.max_retries,
                error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }

            attempt += 1;
        }
    }
}
