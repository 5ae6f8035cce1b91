// 上传接口抽象
//
// 上传核心只依赖这个 trait，真实实现是 NetdiskClient，测试中替换为 mock

use crate::netdisk::{
    CreateFileRequest, CreateFileResponse, PcsError, PrecreateRequest, PrecreateResponse,
    SliceUploadRequest, SliceUploadResponse,
};
use async_trait::async_trait;

/// 百度网盘上传接口
#[async_trait]
pub trait UploadApi: Send + Sync {
    /// 获取当前可用的上传服务器地址列表（https，主服务器优先）
    async fn locate_upload(&self, access_token: &str) -> Result<Vec<String>, PcsError>;

    /// 预上传，申请 uploadid
    async fn precreate(
        &self,
        access_token: &str,
        req: &PrecreateRequest,
    ) -> Result<PrecreateResponse, PcsError>;

    /// 上传单个分片到指定上传服务器
    async fn upload_slice(
        &self,
        base_url: &str,
        access_token: &str,
        req: &SliceUploadRequest,
    ) -> Result<SliceUploadResponse, PcsError>;

    /// 创建文件（合并所有分片）
    async fn create_file(
        &self,
        access_token: &str,
        req: &CreateFileRequest,
    ) -> Result<CreateFileResponse, PcsError>;
}
