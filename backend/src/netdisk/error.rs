//! 网盘接口错误分类
//!
//! 每一次远端调用失败都归类为一个 [`UploadErrorKind`]，
//! 重试控制器只根据这个分类决定是否重试，不对错误信息做字符串匹配。

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 上传错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    /// 请求超时
    Timeout,
    /// 网络错误（连接失败、DNS 等）
    Network,
    /// 连接被重置 / 响应体中断
    ConnectionReset,
    /// 服务器内部错误（5xx）
    ServerError,
    /// 触发限流
    RateLimited,
    /// access token 无效或过期
    Unauthorized,
    /// 无权限
    Forbidden,
    /// 请求参数错误
    BadRequest,
    /// 网盘空间不足
    QuotaExceeded,
    /// 文件不存在
    FileNotFound,
    /// 响应格式无法解析
    MalformedResponse,
    /// 上传地址获取失败
    EndpointUnavailable,
    /// 已取消
    Cancelled,
    /// 未知错误
    Unknown,
}

/// 重试处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// 消耗一次重试机会后重试
    Retry,
    /// 立即失败，不消耗重试次数
    Fatal,
}

impl UploadErrorKind {
    /// 重试策略表
    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            UploadErrorKind::Timeout
            | UploadErrorKind::Network
            | UploadErrorKind::ConnectionReset
            | UploadErrorKind::ServerError
            | UploadErrorKind::RateLimited => RetryDisposition::Retry,
            UploadErrorKind::Unauthorized
            | UploadErrorKind::Forbidden
            | UploadErrorKind::BadRequest
            | UploadErrorKind::QuotaExceeded
            | UploadErrorKind::FileNotFound
            | UploadErrorKind::MalformedResponse
            | UploadErrorKind::EndpointUnavailable
            | UploadErrorKind::Cancelled
            | UploadErrorKind::Unknown => RetryDisposition::Fatal,
        }
    }

    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        self.retry_disposition() == RetryDisposition::Retry
    }

    /// 是否属于连接类错误（可能意味着上传域名已失效）
    pub fn is_connection_class(&self) -> bool {
        matches!(
            self,
            UploadErrorKind::Timeout | UploadErrorKind::Network | UploadErrorKind::ConnectionReset
        )
    }

    /// 根据 HTTP 状态码分类
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => UploadErrorKind::RateLimited,
            401 => UploadErrorKind::Unauthorized,
            403 => UploadErrorKind::Forbidden,
            404 => UploadErrorKind::FileNotFound,
            400..=499 => UploadErrorKind::BadRequest,
            500..=599 => UploadErrorKind::ServerError,
            _ => UploadErrorKind::Unknown,
        }
    }

    /// 根据百度接口 errno / error_code 分类
    pub fn from_errno(errno: i64) -> Self {
        match errno {
            -6 | 110 | 111 | 31045 => UploadErrorKind::Unauthorized,
            -10 => UploadErrorKind::QuotaExceeded,
            2 | -7 | 31299 | 31363 | 31364 => UploadErrorKind::BadRequest,
            31034 => UploadErrorKind::RateLimited,
            -9 | 31190 => UploadErrorKind::FileNotFound,
            10 | 31352 | 31353 => UploadErrorKind::ServerError,
            _ => UploadErrorKind::Unknown,
        }
    }
}

/// 单次网盘接口调用的错误
#[derive(Debug, Clone)]
pub struct PcsError {
    /// 错误分类
    pub kind: UploadErrorKind,
    /// 百度返回的 errno（如有）
    pub errno: Option<i64>,
    /// 错误描述
    pub message: String,
}

impl PcsError {
    pub fn new(kind: UploadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            errno: None,
            message: message.into(),
        }
    }

    /// 由百度接口 errno 构造
    pub fn from_errno(errno: i64, message: impl Into<String>) -> Self {
        Self {
            kind: UploadErrorKind::from_errno(errno),
            errno: Some(errno),
            message: message.into(),
        }
    }

    /// 由 HTTP 状态码构造
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::from_status(status), format!("HTTP {}: {}", status, body.into()))
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl fmt::Display for PcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno {
            Some(errno) => write!(f, "{:?} (errno={}): {}", self.kind, errno, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for PcsError {}
