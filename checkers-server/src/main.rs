use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkers_server::DEFAULT_CONFIG_FILE;

/// 跳棋服务端
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("checkers_server=debug".parse()?))
        .init();

    let args = Args::parse();

    info!("跳棋服务端启动中...");
    checkers_server::launch(&args.config).await
}
