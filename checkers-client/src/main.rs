use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkers_client::{random_pseudonym, terminal, ClientSession, Settings};
use checkers_server::DEFAULT_CONFIG_FILE;

/// 跳棋
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 运行服务器而不是客户端
    #[arg(short, long)]
    server: bool,

    /// 服务器配置文件路径（仅 --server）
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// 服务器地址，覆盖设置
    #[arg(long)]
    address: Option<String>,

    /// 服务器端口，覆盖设置
    #[arg(long)]
    port: Option<u16>,

    /// 昵称，覆盖设置
    #[arg(long)]
    pseudo: Option<String>,

    /// 退出时不保存设置
    #[arg(short, long)]
    portable: bool,

    /// 每次使用随机昵称
    #[arg(short = 'P', long)]
    pseudo_aleatoire: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let directive = if args.server {
        "checkers_server=debug"
    } else {
        "checkers_client=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    if args.server {
        info!("跳棋服务端启动中...");
        return checkers_server::launch(&args.config).await;
    }

    let mut settings = Settings::load();
    if let Some(address) = args.address {
        settings.adresse = address;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    // 随机昵称与命令行昵称只用于本次运行，不写回设置
    let pseudonym = if args.pseudo_aleatoire {
        random_pseudonym()
    } else {
        args.pseudo.unwrap_or_else(|| settings.pseudo.clone())
    };

    let session = ClientSession::connect(&settings.server_address(), &pseudonym, settings.board_size()).await?;
    let result = terminal::run(session).await;

    if !args.portable {
        if let Err(e) = settings.save() {
            warn!("{}", e);
        }
    }
    result
}
