// 网盘上传接口数据类型

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// precreate 返回类型：普通上传
pub const RETURN_TYPE_UPLOAD: i32 = 1;
/// precreate 返回类型：秒传成功（云端已存在相同文件）
pub const RETURN_TYPE_RAPID: i32 = 2;

/// 预上传请求
#[derive(Debug, Clone, Serialize)]
pub struct PrecreateRequest {
    /// 网盘目标路径
    pub path: String,
    /// 文件大小
    pub size: u64,
    /// 各分片 MD5 列表
    pub block_list: Vec<String>,
    /// 整个文件的 MD5
    pub content_md5: String,
    /// 文件前 256KB 的 MD5
    pub slice_md5: String,
}

/// 预上传响应
#[derive(Debug, Clone, Deserialize)]
pub struct PrecreateResponse {
    /// 错误码（0表示成功）
    pub errno: i64,

    /// 1=需要上传分片，2=秒传成功
    #[serde(default)]
    pub return_type: i32,

    /// 上传 ID
    #[serde(default)]
    pub uploadid: String,

    /// 服务端仍需要的分片序号
    #[serde(default)]
    pub block_list: Vec<usize>,

    /// 秒传成功时返回的文件信息
    #[serde(default)]
    pub info: Option<CreateFileResponse>,
}

impl PrecreateResponse {
    /// 是否秒传成功
    pub fn is_rapid(&self) -> bool {
        self.return_type == RETURN_TYPE_RAPID
    }
}

/// 分片上传请求
#[derive(Debug, Clone)]
pub struct SliceUploadRequest {
    /// 网盘目标路径
    pub path: String,
    /// 上传 ID
    pub upload_id: String,
    /// 分片序号
    pub partseq: usize,
    /// 分片在文件中的偏移
    pub offset: u64,
    /// 分片数据（重试时克隆只增加引用计数）
    pub payload: Bytes,
}

/// 分片上传响应（superfile2）
#[derive(Debug, Clone, Deserialize)]
pub struct SliceUploadResponse {
    /// 分片 MD5
    #[serde(default)]
    pub md5: String,

    /// 错误码（superfile2 失败时返回）
    #[serde(default)]
    pub error_code: i64,

    /// 错误信息
    #[serde(default)]
    pub error_msg: String,

    #[serde(default)]
    pub request_id: u64,
}

/// 创建文件（合并分片）请求
#[derive(Debug, Clone, Serialize)]
pub struct CreateFileRequest {
    /// 网盘目标路径
    pub path: String,
    /// 文件大小
    pub size: u64,
    /// 上传 ID
    pub upload_id: String,
    /// 分片总数
    pub chunk_count: usize,
    /// 各分片 MD5 列表
    pub block_list: Vec<String>,
}

/// 创建文件响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFileResponse {
    /// 错误码
    #[serde(default)]
    pub errno: i64,

    /// 文件服务器ID
    #[serde(default)]
    pub fs_id: u64,

    /// 文件路径
    #[serde(default)]
    pub path: String,

    /// 文件大小
    #[serde(default)]
    pub size: u64,

    /// 文件 MD5
    #[serde(default)]
    pub md5: String,

    /// 服务器创建时间
    #[serde(default)]
    pub ctime: i64,

    /// 服务器修改时间
    #[serde(default)]
    pub mtime: i64,
}

/// 上传服务器
#[derive(Debug, Clone, Deserialize)]
pub struct UploadServer {
    pub server: String,
}

/// locateupload 响应
#[derive(Debug, Clone, Deserialize)]
pub struct LocateUploadResponse {
    /// 错误码
    #[serde(default)]
    pub error_code: i64,

    /// 错误信息
    #[serde(default)]
    pub error_msg: String,

    /// 主机名
    #[serde(default)]
    pub host: String,

    /// 上传服务器列表
    #[serde(default)]
    pub servers: Vec<UploadServer>,

    /// 备用上传服务器列表
    #[serde(default)]
    pub bak_servers: Vec<UploadServer>,
}

impl LocateUploadResponse {
    /// 所有 https 上传地址（主服务器优先）
    pub fn https_servers(&self) -> Vec<String> {
        self.servers
            .iter()
            .chain(self.bak_servers.iter())
            .map(|s| s.server.trim_end_matches('/').to_string())
            .filter(|s| s.starts_with("https://"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_request_clone_shares_payload() {
        let req = SliceUploadRequest {
            path: "/apps/a.bin".to_string(),
            upload_id: "N1-abc".to_string(),
            partseq: 0,
            offset: 0,
            payload: Bytes::from(vec![7u8; 4096]),
        };
        let retry = req.clone();

        assert_eq!(retry.payload.len(), 4096);
        assert_eq!(retry.payload.as_ptr(), req.payload.as_ptr());
    }

    #[test]
    fn test_precreate_rapid() {
        let json = r#"{"errno":0,"return_type":2,"info":{"fs_id":42,"path":"/a.txt","size":3,"md5":"abc"}}"#;
        let resp: PrecreateResponse = serde_json::from_str(json).unwrap();

        assert!(resp.is_rapid());
        assert!(resp.uploadid.is_empty());
        assert_eq!(resp.info.unwrap().fs_id, 42);
    }

    #[test]
    fn test_precreate_block_list() {
        let json = r#"{"errno":0,"return_type":1,"uploadid":"N1-abc","block_list":[0,2]}"#;
        let resp: PrecreateResponse = serde_json::from_str(json).unwrap();

        assert!(!resp.is_rapid());
        assert_eq!(resp.uploadid, "N1-abc");
        assert_eq!(resp.block_list, vec![0, 2]);
    }

    #[test]
    fn test_locate_https_servers() {
        let json = r#"{
            "error_code": 0,
            "host": "c.pcs.baidu.com",
            "servers": [{"server": "http://xafj-ct11.pcs.baidu.com"}, {"server": "https://xafj-ct11.pcs.baidu.com/"}],
            "bak_servers": [{"server": "https://c7.pcs.baidu.com"}]
        }"#;
        let resp: LocateUploadResponse = serde_json::from_str(json).unwrap();

        assert_eq!(
            resp.https_servers(),
            vec![
                "https://xafj-ct11.pcs.baidu.com".to_string(),
                "https://c7.pcs.baidu.com".to_string()
            ]
        );
    }

    #[test]
    fn test_locate_no_servers() {
        let resp: LocateUploadResponse = serde_json::from_str(r#"{"error_code":0}"#).unwrap();
        assert!(resp.https_servers().is_empty());
    }
}
