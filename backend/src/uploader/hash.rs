// 上传校验值计算
//
// precreate 需要：
// - block_list：按分片计划计算的每个分片 MD5
// - content-md5：整个文件的 MD5
// - slice-md5：文件前 256KB 的 MD5

use crate::uploader::ChunkPlan;
use md5::{Digest, Md5};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// slice-md5 的校验长度
pub const SLICE_MD5_SIZE: u64 = 256 * 1024;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 文件校验值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashes {
    pub content_md5: String,
    pub slice_md5: String,
    pub block_list: Vec<String>,
}

/// 计算文件校验值（阻塞读取放在 blocking 线程池）
pub async fn compute_file_hashes(local_path: &Path, plan: &ChunkPlan) -> std::io::Result<FileHashes> {
    let local_path = local_path.to_path_buf();
    let ranges: Vec<(u64, u64)> = plan.chunks().iter().map(|c| (c.offset, c.size)).collect();

    tokio::task::spawn_blocking(move || hash_blocking(&local_path, &ranges))
        .await
        .map_err(std::io::Error::other)?
}

fn hash_blocking(local_path: &Path, ranges: &[(u64, u64)]) -> std::io::Result<FileHashes> {
    let mut file = std::fs::File::open(local_path)?;
    let mut content = Md5::new();
    let mut slice = Md5::new();
    let mut block_list = Vec::with_capacity(ranges.len());
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut consumed: u64 = 0;

    for &(offset, size) in ranges {
        file.seek(SeekFrom::Start(offset))?;
        let mut block = Md5::new();
        let mut remaining = size;

        while remaining > 0 {
            let want = remaining.min(READ_BUFFER_SIZE as u64) as usize;
            file.read_exact(&mut buffer[..want])?;
            let data = &buffer[..want];

            block.update(data);
            content.update(data);
            if consumed < SLICE_MD5_SIZE {
                let take = (SLICE_MD5_SIZE - consumed).min(want as u64) as usize;
                slice.update(&data[..take]);
            }

            consumed += want as u64;
            remaining -= want as u64;
        }

        block_list.push(format!("{:x}", block.finalize()));
    }

    Ok(FileHashes {
        content_md5: format!("{:x}", content.finalize()),
        slice_md5: format!("{:x}", slice.finalize()),
        block_list,
    })
}

/// 读取单个分片数据
pub async fn read_chunk_data(local_path: &Path, offset: u64, size: u64) -> std::io::Result<Vec<u8>> {
    let local_path = local_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&local_path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; size as usize];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VipType;
    use crate::uploader::ChunkPlanner;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn md5_hex(data: &[u8]) -> String {
        format!("{:x}", Md5::digest(data))
    }

    fn temp_file_with(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_block_hashes_match_chunks() {
        let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
        let file = temp_file_with(&data);

        let plan = ChunkPlanner::new(VipType::Normal, false).plan(data.len() as u64, 300_000, 3);
        let hashes = compute_file_hashes(file.path(), &plan).await.unwrap();

        assert_eq!(hashes.block_list.len(), 4);
        for chunk in plan.chunks() {
            let range = chunk.offset as usize..(chunk.offset + chunk.size) as usize;
            assert_eq!(hashes.block_list[chunk.index], md5_hex(&data[range]));
        }
        assert_eq!(hashes.content_md5, md5_hex(&data));
        assert_eq!(hashes.slice_md5, md5_hex(&data[..SLICE_MD5_SIZE as usize]));
    }

    #[tokio::test]
    async fn test_small_file_slice_md5() {
        let data = b"hello netdisk";
        let file = temp_file_with(data);

        let plan = ChunkPlanner::new(VipType::Normal, false).plan(data.len() as u64, 0, 3);
        let hashes = compute_file_hashes(file.path(), &plan).await.unwrap();

        assert_eq!(hashes.block_list, vec![md5_hex(data)]);
        assert_eq!(hashes.slice_md5, md5_hex(data));
        assert_eq!(hashes.content_md5, md5_hex(data));
    }

    #[tokio::test]
    async fn test_empty_file_hashes() {
        let file = temp_file_with(b"");
        let plan = ChunkPlanner::new(VipType::Normal, false).plan(0, 0, 3);
        let hashes = compute_file_hashes(file.path(), &plan).await.unwrap();

        assert_eq!(hashes.block_list, vec![md5_hex(b"")]);
        assert_eq!(hashes.content_md5, md5_hex(b""));
    }

    #[tokio::test]
    async fn test_read_chunk_data() {
        let file = temp_file_with(b"0123456789");
        let data = read_chunk_data(file.path(), 3, 4).await.unwrap();
        assert_eq!(data, b"3456");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let plan = ChunkPlanner::new(VipType::Normal, false).plan(10, 0, 1);
        let result = compute_file_hashes(Path::new("/nonexistent/netdisk/file"), &plan).await;
        assert!(result.is_err());
    }
}
