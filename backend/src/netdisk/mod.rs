// 网盘上传接口模块

pub mod api;
pub mod client;
pub mod error;
pub mod types;

pub use api::UploadApi;
pub use client::NetdiskClient;
pub use error::{PcsError, RetryDisposition, UploadErrorKind};
pub use types::{
    CreateFileRequest, CreateFileResponse, LocateUploadResponse, PrecreateRequest,
    PrecreateResponse, SliceUploadRequest, SliceUploadResponse, UploadServer, RETURN_TYPE_RAPID,
    RETURN_TYPE_UPLOAD,
};
