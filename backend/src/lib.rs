// Baidu Netdisk Upload Library
// 百度网盘分片上传核心库

// 配置管理模块
pub mod config;

// 网盘上传接口模块
pub mod netdisk;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, UploadConfig, VipType};
pub use netdisk::{NetdiskClient, PcsError, UploadApi, UploadErrorKind};
pub use uploader::{
    ChunkPlan, ChunkPlanner, CommitResult, EndpointResolver, RetryController, RetryPolicy,
    SessionHandle, SessionState, TransferWorkerPool, UploadError, UploadTarget, Uploader,
};
