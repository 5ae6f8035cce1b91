// 配置管理模块

use crate::uploader::{EndpointSettings, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认上传地址（动态获取失败时的备用地址）
pub const UPLOAD_FALLBACK_API: &str = "https://d.pcs.baidu.com";

/// 上传线程数范围
pub const MIN_UPLOAD_THREADS: usize = 1;
pub const MAX_UPLOAD_THREADS: usize = 32;

const MB: u64 = 1024 * 1024;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
}

/// VIP 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VipType {
    /// 普通用户
    #[default]
    Normal,
    /// 普通会员
    Vip,
    /// 超级会员
    Svip,
}

impl VipType {
    /// 从数字创建（百度 uinfo 接口的 vip_type）
    pub fn from_u32(value: u32) -> Self {
        match value {
            2 => VipType::Svip,
            1 => VipType::Vip,
            _ => VipType::Normal,
        }
    }

    /// 该 VIP 等级允许的最大上传分片大小（字节）
    pub fn max_slice_size(&self) -> u64 {
        match self {
            VipType::Normal => 4 * MB,
            VipType::Vip => 16 * MB,
            VipType::Svip => 32 * MB,
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 上传线程数（1 <= thread <= 32）
    pub upload_thread: usize,
    /// 上传地址（开启动态上传地址时作为备用地址）
    pub upload_api: String,
    /// 是否动态获取上传域名
    pub use_dynamic_upload_api: bool,
    /// 动态获取失败时是否允许回退到 upload_api
    pub allow_fallback: bool,
    /// 自定义分片大小（字节），0 表示自动
    pub custom_upload_part_size: u64,
    /// 低带宽上传模式
    pub low_bandwidth_upload_mode: bool,
    /// 账号 VIP 等级（决定分片大小上限）
    pub vip_type: VipType,
    /// 单个请求最大重试次数
    pub max_retries: u32,
    /// 初始重试等待（毫秒）
    pub retry_wait_ms: u64,
    /// 最大重试等待（毫秒）
    pub retry_max_wait_ms: u64,
    /// 上传地址有效期（秒）
    pub upload_url_expire_secs: u64,
    /// 上传请求超时（秒）
    pub upload_timeout_secs: u64,
    /// 获取上传地址超时（秒）
    pub locate_timeout_secs: u64,
    /// 断点续传记录文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_file: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_thread: 3,
            upload_api: UPLOAD_FALLBACK_API.to_string(),
            use_dynamic_upload_api: true,
            allow_fallback: true,
            custom_upload_part_size: 0,
            low_bandwidth_upload_mode: false,
            vip_type: VipType::Normal,
            max_retries: 3,
            retry_wait_ms: 1000,
            retry_max_wait_ms: 5000,
            upload_url_expire_secs: 60 * 60,
            upload_timeout_secs: 30 * 60,
            locate_timeout_secs: 10,
            progress_file: None,
        }
    }
}

impl UploadConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_UPLOAD_THREADS..=MAX_UPLOAD_THREADS).contains(&self.upload_thread) {
            return Err(format!(
                "上传线程数必须在 {}-{} 之间，当前: {}",
                MIN_UPLOAD_THREADS, MAX_UPLOAD_THREADS, self.upload_thread
            ));
        }

        if !(self.upload_api.starts_with("https://") || self.upload_api.starts_with("http://")) {
            return Err(format!("上传地址无效: '{}'", self.upload_api));
        }

        if self.retry_wait_ms > self.retry_max_wait_ms {
            return Err(format!(
                "初始重试等待 ({}ms) 不能大于最大重试等待 ({}ms)",
                self.retry_wait_ms, self.retry_max_wait_ms
            ));
        }

        if self.upload_timeout_secs == 0 {
            return Err("上传请求超时不能为 0".to_string());
        }

        Ok(())
    }

    /// 实际使用的上传线程数
    ///
    /// 低带宽模式固定单线程
    pub fn effective_threads(&self) -> usize {
        if self.low_bandwidth_upload_mode {
            return 1;
        }
        self.upload_thread
            .clamp(MIN_UPLOAD_THREADS, MAX_UPLOAD_THREADS)
    }

    /// 单个上传请求超时
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// 重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_wait: Duration::from_millis(self.retry_wait_ms),
            max_wait: Duration::from_millis(self.retry_max_wait_ms),
            attempt_timeout: self.upload_timeout(),
            jitter: false,
        }
    }

    /// 上传地址解析配置
    pub fn endpoint_settings(&self) -> EndpointSettings {
        EndpointSettings {
            dynamic: self.use_dynamic_upload_api,
            fallback_url: self.upload_api.trim_end_matches('/').to_string(),
            allow_fallback: self.allow_fallback,
            ttl: Duration::from_secs(self.upload_url_expire_secs),
            lookup_timeout: Duration::from_secs(self.locate_timeout_secs),
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

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

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
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 尝试保存默认配置
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.upload_thread, 3);
        assert_eq!(config.upload.upload_api, UPLOAD_FALLBACK_API);
        assert!(config.upload.use_dynamic_upload_api);
        assert_eq!(config.upload.custom_upload_part_size, 0);
        assert!(config.upload.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.upload.upload_thread = 8;
        config.upload.vip_type = VipType::Svip;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.upload_thread, 8);
        assert_eq!(loaded.upload.vip_type, VipType::Svip);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [upload]
            upload_thread = 5
            low_bandwidth_upload_mode = true
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.upload_thread, 5);
        assert!(config.upload.low_bandwidth_upload_mode);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.upload.upload_api, UPLOAD_FALLBACK_API);
    }

    #[test]
    fn test_config_validation() {
        let mut config = UploadConfig::default();

        config.upload_thread = 0;
        assert!(config.validate().is_err());

        config.upload_thread = 33;
        assert!(config.validate().is_err());

        config.upload_thread = 32;
        assert!(config.validate().is_ok());

        config.upload_api = "d.pcs.baidu.com".to_string();
        assert!(config.validate().is_err());

        config.upload_api = UPLOAD_FALLBACK_API.to_string();
        config.retry_wait_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_threads() {
        let mut config = UploadConfig::default();
        config.upload_thread = 8;
        assert_eq!(config.effective_threads(), 8);

        config.low_bandwidth_upload_mode = true;
        assert_eq!(config.effective_threads(), 1);
    }

    #[test]
    fn test_vip_slice_size() {
        assert_eq!(VipType::from_u32(0), VipType::Normal);
        assert_eq!(VipType::from_u32(2), VipType::Svip);
        assert_eq!(VipType::Normal.max_slice_size(), 4 * MB);
        assert_eq!(VipType::Vip.max_slice_size(), 16 * MB);
        assert_eq!(VipType::Svip.max_slice_size(), 32 * MB);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = UploadConfig::default();
        let policy = config.retry_policy();

        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_wait, Duration::from_secs(1));
        assert_eq!(policy.max_wait, Duration::from_secs(5));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(1800));
    }
}
