//! 跳棋客户端
//!
//! 无界面的会话层维护一份本地棋盘副本，终端前端只负责输入与显示。

pub mod session;
pub mod settings;
pub mod terminal;

pub use session::{ClientSession, Replica, SessionError};
pub use settings::{random_pseudonym, Settings};
