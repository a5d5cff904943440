//! 客户端设置
//!
//! 保存在配置目录下的 `checkers/reglages.toml`，读取失败时回退到默认值。

use std::path::{Path, PathBuf};

use protocol::{DEFAULT_BOARD_SIZE, DEFAULT_PORT, MAX_BOARD_SIZE, MIN_BOARD_SIZE};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 随机昵称，形如 `Joueur042`
pub fn random_pseudonym() -> String {
    format!("Joueur{:03}", rand::thread_rng().gen_range(0..1000))
}

/// 客户端设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// 昵称
    pub pseudo: String,
    /// 创建房间时希望的棋盘边长
    pub taille_damier: usize,
    /// 服务器地址
    pub adresse: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pseudo: random_pseudonym(),
            taille_damier: DEFAULT_BOARD_SIZE,
            adresse: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    /// 获取设置文件路径
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("checkers");
            path.push("reglages.toml");
            path
        })
    }

    /// 从默认位置加载
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            tracing::warn!("无法获取配置目录，使用默认设置");
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// 从文件加载设置
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("设置文件不存在，使用默认设置");
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Settings>(&content) {
                Ok(settings) if settings.is_valid() => {
                    tracing::info!("已加载设置: {:?}", path);
                    settings
                }
                Ok(_) => {
                    tracing::warn!("设置值超出范围，使用默认设置");
                    Self::default()
                }
                Err(e) => {
                    tracing::warn!("设置文件格式无效: {}，使用默认设置", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("无法读取设置文件: {}，使用默认设置", e);
                Self::default()
            }
        }
    }

    fn is_valid(&self) -> bool {
        (MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&self.taille_damier) && self.port != 0
    }

    /// 保存到默认位置
    pub fn save(&self) -> Result<(), String> {
        let Some(path) = Self::settings_path() else {
            return Err("无法获取配置目录".to_string());
        };
        self.save_to(&path)
    }

    /// 保存设置到文件
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(format!("无法创建配置目录: {}", e));
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| format!("序列化设置失败: {}", e))?;
        std::fs::write(path, format!("# réglages du jeu\n{}", content))
            .map_err(|e| format!("写入设置文件失败: {}", e))?;

        tracing::info!("设置已保存: {:?}", path);
        Ok(())
    }

    /// 服务器地址
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.adresse, self.port)
    }

    /// 握手时附带的棋盘边长，默认边长不附带
    pub fn board_size(&self) -> Option<usize> {
        (self.taille_damier != DEFAULT_BOARD_SIZE).then_some(self.taille_damier)
    }
}
