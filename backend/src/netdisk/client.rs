// 网盘客户端实现（上传相关接口）

use crate::netdisk::{
    CreateFileRequest, CreateFileResponse, LocateUploadResponse, PcsError, PrecreateRequest,
    PrecreateResponse, SliceUploadRequest, SliceUploadResponse, UploadApi, UploadErrorKind,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

/// xpan 文件接口（precreate / create）
pub const PAN_FILE_API: &str = "https://pan.baidu.com/rest/2.0/xpan/file";

/// locateupload 接口
pub const LOCATE_UPLOAD_API: &str = "https://d.pcs.baidu.com/rest/2.0/pcs/file";

/// 百度网盘客户端 app_id
const APP_ID: &str = "250528";

/// 百度网盘客户端
#[derive(Debug, Clone)]
pub struct NetdiskClient {
    /// HTTP客户端
    client: Client,
    /// 用户User-Agent
    user_agent: String,
    /// precreate / create 接口地址
    file_api: String,
    /// locateupload 接口地址
    locate_api: String,
}

impl NetdiskClient {
    /// 创建新的网盘客户端
    ///
    /// # 参数
    /// * `request_timeout` - 单个请求超时（分片上传可能很慢，默认30分钟）
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(Self::default_user_agent())
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            user_agent: Self::default_user_agent(),
            file_api: PAN_FILE_API.to_string(),
            locate_api: LOCATE_UPLOAD_API.to_string(),
        })
    }

    /// 替换接口地址（私有部署 / 本地代理）
    pub fn with_endpoints(mut self, file_api: impl Into<String>, locate_api: impl Into<String>) -> Self {
        self.file_api = file_api.into();
        self.locate_api = locate_api.into();
        self
    }

    /// 开放平台要求的 User-Agent
    fn default_user_agent() -> String {
        "pan.baidu.com".to_string()
    }

    /// 分片上传地址
    fn slice_upload_url(base_url: &str) -> String {
        format!("{}/rest/2.0/pcs/superfile2", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl UploadApi for NetdiskClient {
    async fn locate_upload(&self, access_token: &str) -> Result<Vec<String>, PcsError> {
        info!("获取上传服务器地址");

        let response = self
            .client
            .get(&self.locate_api)
            .query(&[
                ("method", "locateupload"),
                ("appid", APP_ID),
                ("upload_version", "2.0"),
                ("access_token", access_token),
            ])
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(transport_error)?;

        let locate: LocateUploadResponse = read_json(response).await?;

        if locate.error_code != 0 {
            return Err(PcsError::from_errno(locate.error_code, locate.error_msg));
        }

        let servers = locate.https_servers();
        if servers.is_empty() {
            warn!("locateupload 未返回可用的 https 上传地址: host={}", locate.host);
            return Err(PcsError::new(
                UploadErrorKind::MalformedResponse,
                "响应中没有可用的 https 上传地址",
            ));
        }

        debug!("上传服务器列表: {:?}", servers);
        Ok(servers)
    }

    async fn precreate(
        &self,
        access_token: &str,
        req: &PrecreateRequest,
    ) -> Result<PrecreateResponse, PcsError> {
        info!(
            "预上传: path={}, size={}, 分片数={}",
            req.path,
            req.size,
            req.block_list.len()
        );

        let block_list = serde_json::to_string(&req.block_list)
            .map_err(|e| PcsError::new(UploadErrorKind::BadRequest, e.to_string()))?;

        let response = self
            .client
            .post(&self.file_api)
            .query(&[("method", "precreate"), ("access_token", access_token)])
            .form(&[
                ("path", req.path.clone()),
                ("size", req.size.to_string()),
                ("isdir", "0".to_string()),
                ("autoinit", "1".to_string()),
                ("rtype", "3".to_string()),
                ("block_list", block_list),
                ("content-md5", req.content_md5.clone()),
                ("slice-md5", req.slice_md5.clone()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let precreate: PrecreateResponse = read_json(response).await?;

        if precreate.errno != 0 {
            return Err(PcsError::from_errno(precreate.errno, "precreate 失败"));
        }

        if !precreate.is_rapid() && precreate.uploadid.is_empty() {
            return Err(PcsError::new(
                UploadErrorKind::MalformedResponse,
                "precreate 响应缺少 uploadid",
            ));
        }

        Ok(precreate)
    }

    async fn upload_slice(
        &self,
        base_url: &str,
        access_token: &str,
        req: &SliceUploadRequest,
    ) -> Result<SliceUploadResponse, PcsError> {
        let part = Part::stream_with_length(req.payload.clone(), req.payload.len() as u64)
            .file_name("file");
        let form = Form::new().part("file", part);
        let partseq = req.partseq.to_string();

        let response = self
            .client
            .post(Self::slice_upload_url(base_url))
            .query(&[
                ("method", "upload"),
                ("access_token", access_token),
                ("type", "tmpfile"),
                ("path", req.path.as_str()),
                ("uploadid", req.upload_id.as_str()),
                ("partseq", partseq.as_str()),
            ])
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let slice: SliceUploadResponse = read_json(response).await?;

        if slice.error_code != 0 {
            return Err(PcsError::from_errno(slice.error_code, slice.error_msg));
        }

        if slice.md5.is_empty() {
            return Err(PcsError::new(
                UploadErrorKind::MalformedResponse,
                format!("分片 #{} 响应缺少 md5", req.partseq),
            ));
        }

        Ok(slice)
    }

    async fn create_file(
        &self,
        access_token: &str,
        req: &CreateFileRequest,
    ) -> Result<CreateFileResponse, PcsError> {
        info!(
            "创建文件: path={}, size={}, 分片数={}",
            req.path, req.size, req.chunk_count
        );

        let block_list = serde_json::to_string(&req.block_list)
            .map_err(|e| PcsError::new(UploadErrorKind::BadRequest, e.to_string()))?;

        let response = self
            .client
            .post(&self.file_api)
            .query(&[("method", "create"), ("access_token", access_token)])
            .form(&[
                ("path", req.path.clone()),
                ("size", req.size.to_string()),
                ("isdir", "0".to_string()),
                ("rtype", "3".to_string()),
                ("uploadid", req.upload_id.clone()),
                ("block_list", block_list),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let created: CreateFileResponse = read_json(response).await?;

        if created.errno != 0 {
            return Err(PcsError::from_errno(created.errno, "create 失败"));
        }

        Ok(created)
    }
}

/// 传输层错误分类
fn transport_error(err: reqwest::Error) -> PcsError {
    let kind = if err.is_timeout() {
        UploadErrorKind::Timeout
    } else if err.is_connect() {
        UploadErrorKind::Network
    } else if err.is_decode() {
        UploadErrorKind::MalformedResponse
    } else if err.is_body() || err.is_request() {
        UploadErrorKind::ConnectionReset
    } else if let Some(status) = err.status() {
        UploadErrorKind::from_status(status)
    } else {
        UploadErrorKind::Network
    };

    PcsError::new(kind, err.to_string())
}

/// 读取并解析 JSON 响应
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, PcsError> {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(PcsError::from_status(status, text));
    }

    serde_json::from_str(&text).map_err(|e| {
        PcsError::new(
            UploadErrorKind::MalformedResponse,
            format!("解析 JSON 响应失败: {}, 响应: {}", e, text),
        )
    })
}
