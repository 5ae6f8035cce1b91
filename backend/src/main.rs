use anyhow::{anyhow, Context};
use baidu_netdisk_uploader::{
    netdisk::NetdiskClient,
    uploader::{UploadProgressStore, UploadTarget, Uploader},
    AppConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 百度网盘分片上传工具
#[derive(Parser, Debug)]
#[command(name = "baidu-netdisk-uploader")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 本地文件
    file: PathBuf,

    /// 网盘目标路径，例如 /apps/bypy/a.zip
    remote_path: String,

    /// access token
    #[arg(long, env = "BAIDU_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// 配置文件
    #[arg(short, long, default_value = "config/app.toml")]
    config: String,

    /// 上传线程数
    #[arg(short, long)]
    threads: Option<usize>,

    /// 分片大小（字节），0 表示自动
    #[arg(long)]
    part_size: Option<u64>,

    /// 低带宽上传模式
    #[arg(long)]
    low_bandwidth: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("百度网盘上传 v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load_or_default(&args.config).await.upload;
    if let Some(threads) = args.threads {
        config.upload_thread = threads;
    }
    if let Some(part_size) = args.part_size {
        config.custom_upload_part_size = part_size;
    }
    if args.low_bandwidth {
        config.low_bandwidth_upload_mode = true;
    }
    config.validate().map_err(|e| anyhow!("配置无效: {}", e))?;

    let client = NetdiskClient::new(config.upload_timeout())?;

    let progress = match &config.progress_file {
        Some(path) => UploadProgressStore::load_from_file(path).await?,
        None => UploadProgressStore::new(),
    };
    let progress = Arc::new(progress);

    let uploader =
        Uploader::new(Arc::new(client), config.clone()).with_progress_store(progress.clone());

    let target = UploadTarget::from_local_file(&args.file, args.remote_path, args.access_token)
        .await
        .with_context(|| format!("无法读取本地文件: {:?}", args.file))?;

    let handle = uploader.start(target);

    // Ctrl-C 取消上传
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消上传...");
            ctrl_c_handle.cancel();
        }
    });

    let result = uploader.run(&handle).await;

    if let Some(path) = &config.progress_file {
        if let Err(e) = progress.save_to_file(path).await {
            error!("保存断点续传记录失败: {}", e);
        }
    }

    match result {
        Ok(commit) => {
            info!(
                "上传成功: {} (fs_id={}, 大小={}, 秒传={})",
                commit.path, commit.fs_id, commit.size, commit.rapid
            );
            println!("{}", serde_json::to_string_pretty(&commit)?);
            Ok(())
        }
        Err(e) => {
            if e.is_session_restartable() {
                info!("可以重新执行该命令重试上传");
            }
            Err(e.into())
        }
    }
}
