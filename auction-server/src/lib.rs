//! Auction Server - 实时球员拍卖编排引擎
//!
//! # 架构概述
//!
//! 本模块是拍卖节点的主入口，提供以下核心功能：
//!
//! - **实时网关** (`gateway`): TCP/TLS 连接、身份声明验证、快照推送
//! - **拍卖引擎** (`engine`): 单写者状态机、指令校验、版本化快照
//! - **目录存储** (`catalog`): 嵌入式 redb 存储，加载与结果回写
//! - **认证** (`auth`): JWT 身份声明验证与指令授权表
//!
//! # 模块结构
//!
//! ```text
//! auction-server/src/
//! ├── core/          # 配置、状态、生命周期
//! ├── auth/          # JWT 验证、授权表
//! ├── engine/        # 会话状态机、校验器、单写者工作任务
//! ├── catalog/       # redb 目录存储、种子导入
//! ├── gateway/       # TCP/TLS 网关、快照转发
//! └── utils/         # 错误、日志
//! ```
//!
//! # 数据流
//!
//! ```text
//! Gateway ──► Validator ──► Session (single writer)
//!                               ├──► ResultWriter (durable outcome)
//!                               └──► SnapshotHub ──► every client
//! ```

pub mod auth;
pub mod catalog;
pub mod core;
pub mod engine;
pub mod gateway;
pub mod utils;

// Re-export 公共类型
pub use auth::{Claims, ClientIdentity, JwtService};
pub use catalog::{CatalogSource, CatalogStore, ResultWriter};
pub use core::{Config, Server, ServerState};
pub use engine::{AuctionManager, AuctionSession, EngineHandle, SnapshotHub};
pub use utils::{AppError, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

/// 设置运行环境 (dotenv, 日志)
pub fn setup_environment() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(log_level.as_deref(), log_dir.as_deref());

    Ok(())
}

pub fn print_banner() {
    println!(
        r#"
    ___              __  _
   /   | __  _______/ /_(_)___  ____
  / /| |/ / / / ___/ __/ / __ \/ __ \
 / ___ / /_/ / /__/ /_/ / /_/ / / / /
/_/  |_\__,_/\___/\__/_/\____/_/ /_/
   _____
  / ___/___  ______   _____  _____
  \__ \/ _ \/ ___/ | / / _ \/ ___/
 ___/ /  __/ /   | |/ /  __/ /
/____/\___/_/    |___/\___/_/
    "#
    );
}
