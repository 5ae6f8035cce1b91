// 断点续传记录
//
// 会话被取消时保存 uploadid 与未完成分片，下次上传同一文件（同路径、同 MD5、
// 同分片大小）时跳过 precreate，只上传剩余分片。

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// 单个文件的上传进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// 上传 ID
    pub upload_id: String,
    /// 分片大小
    pub part_size: u64,
    /// 文件大小
    pub total_size: u64,
    /// 尚未上传的分片序号
    pub pending: Vec<usize>,
    /// 各分片 MD5
    pub block_list: Vec<String>,
    /// 保存时间 (Unix timestamp)
    pub saved_at: i64,
}

/// 上传进度存储
#[derive(Debug, Default)]
pub struct UploadProgressStore {
    entries: DashMap<String, UploadProgress>,
}

impl UploadProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录键：远程路径 + 文件 MD5
    pub fn key(remote_path: &str, content_md5: &str) -> String {
        format!("{}:{}", content_md5, remote_path)
    }

    pub fn save(&self, key: String, progress: UploadProgress) {
        debug!(
            "保存上传进度: key={}, 剩余分片={}",
            key,
            progress.pending.len()
        );
        self.entries.insert(key, progress);
    }

    /// 取出进度（取出后记录删除，避免两个会话复用同一个 uploadid）
    pub fn take(&self, key: &str) -> Option<UploadProgress> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 从 JSON 文件加载
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let store = Self::new();
        if !path.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(path)
            .await
            .context("Failed to read upload progress file")?;
        let entries: std::collections::HashMap<String, UploadProgress> =
            serde_json::from_str(&content).context("Failed to parse upload progress file")?;

        info!("加载断点续传记录 {} 条: {:?}", entries.len(), path);
        for (k, v) in entries {
            store.entries.insert(k, v);
        }
        Ok(store)
    }

    /// 保存到 JSON 文件
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot: std::collections::HashMap<String, UploadProgress> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create progress directory")?;
        }

        let json =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize upload progress")?;
        fs::write(path, json)
            .await
            .context("Failed to write upload progress file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> UploadProgress {
        UploadProgress {
            upload_id: "N1-uploadid".to_string(),
            part_size: 4 * 1024 * 1024,
            total_size: 10 * 1024 * 1024,
            pending: vec![1, 2],
            block_list: vec!["a".into(), "b".into(), "c".into()],
            saved_at: 1703203200,
        }
    }

    #[test]
    fn test_take_removes_entry() {
        let store = UploadProgressStore::new();
        let key = UploadProgressStore::key("/apps/a.bin", "abc");
        store.save(key.clone(), sample());

        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&key), Some(sample()));
        assert!(store.take(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_key_distinguishes_path_and_md5() {
        assert_ne!(
            UploadProgressStore::key("/a", "md5"),
            UploadProgressStore::key("/b", "md5")
        );
        assert_ne!(
            UploadProgressStore::key("/a", "md5-1"),
            UploadProgressStore::key("/a", "md5-2")
        );
    }

    #[tokio::test]
    async fn test_file_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/progress.json");

        let store = UploadProgressStore::new();
        store.save("k".to_string(), sample());
        store.save_to_file(&path).await.unwrap();

        let loaded = UploadProgressStore::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.take("k"), Some(sample()));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = UploadProgressStore::load_from_file(&dir.path().join("none.json"))
            .await
            .unwrap();
        assert!(store.is_empty());
    }
}
