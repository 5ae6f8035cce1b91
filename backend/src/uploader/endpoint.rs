//! 上传地址解析
//!
//! 进程内共享的上传域名缓存：
//! - 读取只克隆 `Arc<Endpoint>` 快照
//! - 缓存过期或失效时重新解析，同一时刻只有一个解析请求在进行，
//!   并发调用方共享同一个结果（single-flight）
//! - 动态获取失败时回退到配置的备用地址

use crate::netdisk::UploadApi;
use crate::uploader::UploadError;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 回退地址的最长缓存时间，到期后重新尝试动态获取
pub const FALLBACK_TTL: Duration = Duration::from_secs(60);

/// 连续多少次连接类失败后认为上传地址失效
pub const STALE_FAILURE_THRESHOLD: u32 = 3;

/// 地址来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    /// locateupload 动态获取
    Dynamic,
    /// 动态获取失败后的备用地址
    Fallback,
    /// 未开启动态获取，直接使用配置地址
    Static,
}

/// 上传地址
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    pub obtained_at: Instant,
    pub ttl: Duration,
    pub source: EndpointSource,
}

impl Endpoint {
    fn new(base_url: String, ttl: Duration, source: EndpointSource) -> Self {
        Self {
            base_url,
            obtained_at: Instant::now(),
            ttl,
            source,
        }
    }

    /// 是否仍在有效期内
    pub fn is_fresh(&self) -> bool {
        self.obtained_at.elapsed() < self.ttl
    }
}

/// 地址解析配置
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// 是否动态获取上传域名
    pub dynamic: bool,
    /// 备用上传地址
    pub fallback_url: String,
    /// 动态获取失败时是否允许使用备用地址
    pub allow_fallback: bool,
    /// 地址有效期
    pub ttl: Duration,
    /// 动态获取超时
    pub lookup_timeout: Duration,
}

type LookupFuture = Shared<BoxFuture<'static, Result<Arc<Endpoint>, String>>>;

struct ResolverState {
    api: Arc<dyn UploadApi>,
    settings: EndpointSettings,
    cache: RwLock<Option<Arc<Endpoint>>>,
    inflight: Mutex<Option<LookupFuture>>,
    consecutive_failures: AtomicU32,
}

/// 上传地址解析器
#[derive(Clone)]
pub struct EndpointResolver {
    state: Arc<ResolverState>,
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("settings", &self.state.settings)
            .field("cached", &self.cached())
            .finish()
    }
}

impl EndpointResolver {
    pub fn new(api: Arc<dyn UploadApi>, settings: EndpointSettings) -> Self {
        Self {
            state: Arc::new(ResolverState {
                api,
                settings,
                cache: RwLock::new(None),
                inflight: Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &EndpointSettings {
        &self.state.settings
    }

    /// 当前缓存（仅返回未过期的）
    pub fn cached(&self) -> Option<Arc<Endpoint>> {
        self.state
            .cache
            .read()
            .as_ref()
            .filter(|ep| ep.is_fresh())
            .cloned()
    }

    /// 获取上传地址
    pub async fn resolve(&self, access_token: &str) -> Result<Arc<Endpoint>, UploadError> {
        let settings = &self.state.settings;

        if !settings.dynamic {
            return Ok(Arc::new(Endpoint::new(
                settings.fallback_url.clone(),
                Duration::MAX,
                EndpointSource::Static,
            )));
        }

        if let Some(ep) = self.cached() {
            return Ok(ep);
        }

        let lookup = {
            let mut inflight = self.state.inflight.lock();

            // 双重检查：等锁期间可能已有解析完成
            if let Some(ep) = self.cached() {
                return Ok(ep);
            }

            match inflight.as_ref() {
                Some(fut) => {
                    debug!("加入进行中的上传地址解析");
                    fut.clone()
                }
                None => {
                    let fut = Self::lookup(self.state.clone(), access_token.to_string())
                        .boxed()
                        .shared();
                    *inflight = Some(fut.clone());
                    fut
                }
            }
        };

        lookup.await.map_err(UploadError::EndpointUnavailable)
    }

    /// 执行一次动态解析，并写入缓存
    async fn lookup(state: Arc<ResolverState>, access_token: String) -> Result<Arc<Endpoint>, String> {
        let settings = &state.settings;

        let looked_up = match tokio::time::timeout(
            settings.lookup_timeout,
            state.api.locate_upload(&access_token),
        )
        .await
        {
            Ok(Ok(servers)) => servers
                .into_iter()
                .find(|s| s.starts_with("https://"))
                .ok_or_else(|| "locateupload 未返回 https 上传地址".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("获取上传地址超时 ({:?})", settings.lookup_timeout)),
        };

        let result = match looked_up {
            Ok(url) => {
                info!("获取上传地址成功: {}", url);
                Ok(Arc::new(Endpoint::new(url, settings.ttl, EndpointSource::Dynamic)))
            }
            Err(e) if settings.allow_fallback => {
                warn!(
                    "获取上传地址失败，使用备用地址 {}: {}",
                    settings.fallback_url, e
                );
                Ok(Arc::new(Endpoint::new(
                    settings.fallback_url.clone(),
                    settings.ttl.min(FALLBACK_TTL),
                    EndpointSource::Fallback,
                )))
            }
            Err(e) => {
                warn!("获取上传地址失败，且未允许使用备用地址: {}", e);
                Err(e)
            }
        };

        let mut inflight = state.inflight.lock();
        if let Ok(ep) = &result {
            *state.cache.write() = Some(ep.clone());
            state.consecutive_failures.store(0, Ordering::SeqCst);
        }
        *inflight = None;

        result
    }

    /// 使缓存失效，下次 resolve 会重新获取
    pub fn invalidate(&self) {
        if self.state.cache.write().take().is_some() {
            info!("上传地址缓存已失效");
        }
        self.state.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// 上报使用某个地址时的连接类失败
    ///
    /// 连续失败达到阈值且缓存仍是该地址时使缓存失效
    pub fn report_failure(&self, endpoint: &Endpoint) {
        let failures = self.state.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < STALE_FAILURE_THRESHOLD {
            return;
        }

        let mut cache = self.state.cache.write();
        let is_same = cache
            .as_ref()
            .map(|ep| ep.base_url == endpoint.base_url && ep.obtained_at == endpoint.obtained_at)
            .unwrap_or(false);

        if is_same {
            warn!(
                "上传地址 {} 连续失败 {} 次，重新获取",
                endpoint.base_url, failures
            );
            *cache = None;
        }
        self.state.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// 上报成功，重置连续失败计数
    pub fn report_success(&self) {
        self.state.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netdisk::{
        CreateFileRequest, CreateFileResponse, PcsError, PrecreateRequest, PrecreateResponse,
        SliceUploadRequest, SliceUploadResponse, UploadErrorKind,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// 只实现 locate_upload 的计数 mock
    struct LocateMock {
        calls: AtomicUsize,
        delay: Duration,
        /// 前 N 次调用失败
        failures: usize,
    }

    impl LocateMock {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Self::failing_first(delay, if fail { usize::MAX } else { 0 })
        }

        fn failing_first(delay: Duration, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                failures,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UploadApi for LocateMock {
        async fn locate_upload(&self, _access_token: &str) -> Result<Vec<String>, PcsError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.failures {
                return Err(PcsError::new(UploadErrorKind::ServerError, "locate 失败"));
            }
            Ok(vec![format!("https://c{}.pcs.baidu.com", n)])
        }

        async fn precreate(
            &self,
            _: &str,
            _: &PrecreateRequest,
        ) -> Result<PrecreateResponse, PcsError> {
            unimplemented!()
        }

        async fn upload_slice(
            &self,
            _: &str,
            _: &str,
            _: &SliceUploadRequest,
        ) -> Result<SliceUploadResponse, PcsError> {
            unimplemented!()
        }

        async fn create_file(
            &self,
            _: &str,
            _: &CreateFileRequest,
        ) -> Result<CreateFileResponse, PcsError> {
            unimplemented!()
        }
    }

    fn settings(dynamic: bool, allow_fallback: bool) -> EndpointSettings {
        EndpointSettings {
            dynamic,
            fallback_url: "https://d.pcs.baidu.com".to_string(),
            allow_fallback,
            ttl: Duration::from_secs(3600),
            lookup_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_static_endpoint_no_lookup() {
        let mock = LocateMock::new(Duration::ZERO, false);
        let resolver = EndpointResolver::new(mock.clone(), settings(false, true));

        let ep = resolver.resolve("token").await.unwrap();
        assert_eq!(ep.base_url, "https://d.pcs.baidu.com");
        assert_eq!(ep.source, EndpointSource::Static);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_until_invalidated() {
        let mock = LocateMock::new(Duration::ZERO, false);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, true));

        let first = resolver.resolve("token").await.unwrap();
        let second = resolver.resolve("token").await.unwrap();
        assert_eq!(first.base_url, "https://c0.pcs.baidu.com");
        assert_eq!(second.base_url, first.base_url);
        assert_eq!(mock.calls(), 1);

        resolver.invalidate();
        let third = resolver.resolve("token").await.unwrap();
        assert_eq!(third.base_url, "https://c1.pcs.baidu.com");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_single_flight() {
        let mock = LocateMock::new(Duration::from_millis(100), false);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, true));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve("token").await
            }));
        }

        for handle in handles {
            let ep = handle.await.unwrap().unwrap();
            assert_eq!(ep.base_url, "https://c0.pcs.baidu.com");
        }
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_on_failure() {
        let mock = LocateMock::new(Duration::ZERO, true);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, true));

        let ep = resolver.resolve("token").await.unwrap();
        assert_eq!(ep.source, EndpointSource::Fallback);
        assert_eq!(ep.base_url, "https://d.pcs.baidu.com");
        assert!(ep.ttl <= FALLBACK_TTL);
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let mock = LocateMock::new(Duration::ZERO, true);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, false));

        let err = resolver.resolve("token").await.unwrap_err();
        assert!(matches!(err, UploadError::EndpointUnavailable(_)));
        assert!(resolver.cached().is_none());
    }

    #[tokio::test]
    async fn test_lookup_timeout_falls_back() {
        let mock = LocateMock::new(Duration::from_secs(10), false);
        let mut s = settings(true, true);
        s.lookup_timeout = Duration::from_millis(20);
        let resolver = EndpointResolver::new(mock.clone(), s);

        let ep = resolver.resolve("token").await.unwrap();
        assert_eq!(ep.source, EndpointSource::Fallback);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let mock = LocateMock::new(Duration::ZERO, false);
        let mut s = settings(true, true);
        s.ttl = Duration::from_millis(30);
        let resolver = EndpointResolver::new(mock.clone(), s);

        let first = resolver.resolve("token").await.unwrap();
        assert!(resolver.cached().is_some());
        assert_eq!(resolver.resolve("token").await.unwrap().base_url, first.base_url);
        assert_eq!(mock.calls(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!first.is_fresh());
        assert!(resolver.cached().is_none());

        let second = resolver.resolve("token").await.unwrap();
        assert_eq!(second.base_url, "https://c1.pcs.baidu.com");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_expires_then_dynamic_retried() {
        let mock = LocateMock::failing_first(Duration::ZERO, 1);
        let mut s = settings(true, true);
        s.ttl = Duration::from_millis(30);
        let resolver = EndpointResolver::new(mock.clone(), s);

        let fallback = resolver.resolve("token").await.unwrap();
        assert_eq!(fallback.source, EndpointSource::Fallback);
        assert_eq!(resolver.resolve("token").await.unwrap().source, EndpointSource::Fallback);
        assert_eq!(mock.calls(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(resolver.cached().is_none());

        let dynamic = resolver.resolve("token").await.unwrap();
        assert_eq!(dynamic.source, EndpointSource::Dynamic);
        assert_eq!(dynamic.base_url, "https://c1.pcs.baidu.com");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_ttl_capped() {
        let mock = LocateMock::new(Duration::ZERO, true);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, true));

        let ep = resolver.resolve("token").await.unwrap();
        assert_eq!(ep.ttl, FALLBACK_TTL);
        assert!(resolver.cached().is_some());
    }

    #[tokio::test]
    async fn test_report_failure_invalidates_after_threshold() {
        let mock = LocateMock::new(Duration::ZERO, false);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, true));

        let ep = resolver.resolve("token").await.unwrap();
        for _ in 0..STALE_FAILURE_THRESHOLD - 1 {
            resolver.report_failure(&ep);
        }
        assert!(resolver.cached().is_some());

        resolver.report_failure(&ep);
        assert!(resolver.cached().is_none());

        let next = resolver.resolve("token").await.unwrap();
        assert_ne!(next.base_url, ep.base_url);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_report_failure_ignores_replaced_endpoint() {
        let mock = LocateMock::new(Duration::ZERO, false);
        let resolver = EndpointResolver::new(mock.clone(), settings(true, true));

        let old = resolver.resolve("token").await.unwrap();
        resolver.invalidate();
        let fresh = resolver.resolve("token").await.unwrap();

        for _ in 0..STALE_FAILURE_THRESHOLD {
            resolver.report_failure(&old);
        }
        assert_eq!(resolver.cached().unwrap().base_url, fresh.base_url);
    }
}
