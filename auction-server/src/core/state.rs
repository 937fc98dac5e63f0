//! 服务器状态 - 持有所有服务的单例引用
//!
//! ServerState 是拍卖节点的核心数据结构，持有所有服务的共享引用。
//! 使用 Arc 实现浅拷贝，所有权成本极低。
//!
//! # 服务组件
//!
//! | 字段 | 类型 | 说明 |
//! |------|------|------|
//! | config | Config | 配置项 (不可变) |
//! | store | Arc<CatalogStore> | 目录存储 (redb) |
//! | jwt_service | Arc<JwtService> | JWT 认证服务 |
//! | engine | EngineHandle | 拍卖引擎指令队列 |
//! | hub | SnapshotHub | 快照广播 |

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::JwtService;
use crate::catalog::{CatalogSource, CatalogStore};
use crate::core::Config;
use crate::engine::manager::{AuctionManager, EngineOptions};
use crate::engine::{AuctionSession, EngineHandle, SnapshotHub};
use crate::utils::AppResult;

#[derive(Clone)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// 目录存储
    pub store: Arc<CatalogStore>,
    /// JWT 认证服务
    pub jwt_service: Arc<JwtService>,
    /// 拍卖引擎指令队列句柄
    pub engine: EngineHandle,
    /// 快照广播
    pub hub: SnapshotHub,
    /// 关闭信号
    pub shutdown_token: CancellationToken,
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 按顺序初始化：
    /// 1. 工作目录结构
    /// 2. 目录存储 (work_dir/database/auction.redb)，必要时导入种子
    /// 3. 会话 (Catalog Loader 全量加载)
    /// 4. 快照中心与引擎工作任务
    pub async fn initialize(config: &Config) -> AppResult<Self> {
        // 0. Ensure work_dir structure exists
        config.ensure_work_dir_structure().map_err(|e| {
            crate::utils::AppError::internal(format!("Failed to create work directory: {}", e))
        })?;

        // 1. Catalog store
        let store = Arc::new(CatalogStore::open(config.catalog_db_path())?);
        if let Some(seed_path) = &config.catalog_seed {
            store.seed_if_empty(seed_path)?;
        }

        // 2. Fresh session from the catalog
        let data = store.load_all()?;
        if data.lots.is_empty() {
            tracing::warn!("Catalog is empty; the auction cannot start until a reset after import");
        }
        let session = AuctionSession::from_catalog(data);

        // 3. Snapshot hub seeded with the boot snapshot (version 0)
        let hub = SnapshotHub::new(
            session.snapshot(config.snapshot_tail),
            config.snapshot_channel_capacity,
        );

        // 4. Engine worker (the single writer)
        let shutdown_token = CancellationToken::new();
        let manager = AuctionManager::new(
            session,
            store.clone(),
            store.clone(),
            hub.clone(),
            EngineOptions {
                snapshot_tail: config.snapshot_tail,
                roster_cap: config.roster_cap,
                queue_depth: config.command_queue_depth,
            },
        );
        let engine = manager.spawn(shutdown_token.clone());

        let jwt_service = Arc::new(JwtService::with_config(config.jwt.clone()));

        Ok(Self {
            config: config.clone(),
            store,
            jwt_service,
            engine,
            hub,
            shutdown_token,
        })
    }

    /// 获取 JWT 服务
    pub fn get_jwt_service(&self) -> Arc<JwtService> {
        self.jwt_service.clone()
    }

    /// 停止引擎与所有后台任务
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}
