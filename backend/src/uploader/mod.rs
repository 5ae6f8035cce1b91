// 上传引擎模块

pub mod chunk;
pub mod endpoint;
pub mod error;
pub mod hash;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod session;

pub use chunk::{
    ChunkPlan, ChunkPlanner, UploadChunk, CHUNK_SIZE_STEP, MAX_CHUNK_COUNT, MIN_UPLOAD_CHUNK_SIZE,
};
pub use endpoint::{Endpoint, EndpointResolver, EndpointSettings, EndpointSource, FALLBACK_TTL};
pub use error::UploadError;
pub use hash::{compute_file_hashes, read_chunk_data, FileHashes};
pub use pool::{PoolReport, TransferWorkerPool};
pub use progress::{UploadProgress, UploadProgressStore};
pub use retry::{RetryController, RetryError, RetryPolicy};
pub use session::{
    ClientCredentials, CommitResult, SessionHandle, SessionState, UploadTarget, Uploader,
};
