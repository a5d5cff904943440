//! 服务端配置
//!
//! 配置文件为 TOML，缺失时写入默认配置并中止启动，由管理员检查后重新启动。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::{sanitize_filename, LedgerStore};

/// 默认配置文件内容
pub const DEFAULT_CONFIG: &str = r#"# configuration du serveur de dames
auto_redemarrage = true

[socket]
adresse = "0.0.0.0"
port = 2332

[mysql]
hote = "localhost"
utilisateur = "checkers"
mdp = "checkers"
base = "checkers"

[stockage]
tentatives = 3
"#;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "serveur.toml";

fn default_attempts() -> u32 {
    3
}

/// 监听地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    pub adresse: String,
    pub port: u16,
}

/// 数据库连接参数（由外部服务使用，这里只做校验与记录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub hote: String,
    pub utilisateur: String,
    pub mdp: String,
    pub base: String,
}

/// 本地账本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 账本目录，默认为数据目录下的 checkers
    #[serde(default)]
    pub dossier: Option<PathBuf>,
    /// 每个存储操作的尝试次数
    #[serde(default = "default_attempts")]
    pub tentatives: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dossier: None,
            tentatives: default_attempts(),
        }
    }
}

/// 服务端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听失败后自动重启，并启用存储重试
    pub auto_redemarrage: bool,
    pub socket: SocketConfig,
    pub mysql: MysqlConfig,
    #[serde(default)]
    pub stockage: StorageConfig,
}

/// 加载结果
#[derive(Debug)]
pub enum ConfigStatus {
    Loaded(ServerConfig),
    /// 文件不存在，已写入默认配置
    DefaultWritten(PathBuf),
}

impl ServerConfig {
    /// 加载配置，文件不存在时写入默认配置
    pub fn load_or_init(path: &Path) -> Result<ConfigStatus> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("无法创建配置目录: {:?}", parent))?;
                }
            }
            fs::write(path, DEFAULT_CONFIG)
                .with_context(|| format!("写入默认配置失败: {:?}", path))?;
            return Ok(ConfigStatus::DefaultWritten(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置失败: {:?}", path))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("配置文件无效: {:?}", path))?;

        info!(path = %path.display(), "配置已加载");
        Ok(ConfigStatus::Loaded(config))
    }

    /// 解析并校验
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket.adresse.trim().is_empty() {
            bail!("socket.adresse 不能为空");
        }
        if self.socket.port == 0 {
            bail!("socket.port 不能为 0");
        }
        if self.mysql.base.trim().is_empty() {
            bail!("mysql.base 不能为空");
        }
        if self.stockage.tentatives == 0 {
            bail!("stockage.tentatives 至少为 1");
        }
        Ok(())
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.socket.adresse, self.socket.port)
    }

    /// 存储尝试次数；关闭自动重启时只尝试一次
    pub fn attempts(&self) -> u32 {
        if self.auto_redemarrage {
            self.stockage.tentatives
        } else {
            1
        }
    }

    /// 账本文件路径
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.stockage.dossier {
            Some(dir) => Ok(dir.join(format!("{}.json", sanitize_filename(&self.mysql.base)))),
            None => LedgerStore::default_path(&self.mysql.base).context("无法获取应用数据目录"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auto_redemarrage: true,
            socket: SocketConfig {
                adresse: "0.0.0.0".to_string(),
                port: protocol::DEFAULT_PORT,
            },
            mysql: MysqlConfig {
                hote: "localhost".to_string(),
                utilisateur: "checkers".to_string(),
                mdp: "checkers".to_string(),
                base: "checkers".to_string(),
            },
            stockage: StorageConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_parses() {
        let config = ServerConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "0.0.0.0:2332");
        assert_eq!(config.attempts(), 3);
    }

    #[test]
    fn test_missing_file_writes_default() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("serveur.toml");

        match ServerConfig::load_or_init(&path).unwrap() {
            ConfigStatus::DefaultWritten(written) => assert_eq!(written, path),
            other => panic!("Unexpected status: {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);

        // 第二次启动正常加载
        assert!(matches!(
            ServerConfig::load_or_init(&path).unwrap(),
            ConfigStatus::Loaded(_)
        ));
    }

    #[test]
    fn test_optional_storage_section() {
        let content = r#"
auto_redemarrage = false

[socket]
adresse = "127.0.0.1"
port = 4000

[mysql]
hote = "db"
utilisateur = "u"
mdp = "p"
base = "dames"
"#;
        let config = ServerConfig::from_toml(content).unwrap();
        assert_eq!(config.stockage, StorageConfig::default());
        assert_eq!(config.attempts(), 1);
        assert_eq!(config.bind_address(), "127.0.0.1:4000");
    }

    #[test]
    fn test_ledger_path_override() {
        let mut config = ServerConfig::default();
        config.stockage.dossier = Some(PathBuf::from("/tmp/ledger"));
        assert_eq!(
            config.ledger_path().unwrap(),
            PathBuf::from("/tmp/ledger/checkers.json")
        );
    }

    #[test]
    fn test_ledger_path_is_sanitized() {
        let mut config = ServerConfig::default();
        config.stockage.dossier = Some(PathBuf::from("/tmp/ledger"));
        config.mysql.base = "../dames:prod".to_string();

        let path = config.ledger_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/ledger/.._dames_prod.json"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/ledger")));
    }

    #[test]
    fn test_invalid_values() {
        let zero_port = DEFAULT_CONFIG.replace("port = 2332", "port = 0");
        assert!(ServerConfig::from_toml(&zero_port).is_err());

        let zero_attempts = DEFAULT_CONFIG.replace("tentatives = 3", "tentatives = 0");
        assert!(ServerConfig::from_toml(&zero_attempts).is_err());

        assert!(ServerConfig::from_toml("auto_redemarrage = true").is_err());
    }
}
