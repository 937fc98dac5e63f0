use std::path::PathBuf;

use crate::auth::JwtConfig;

/// 服务器配置 - 拍卖节点的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/auction | 工作目录 |
/// | GATEWAY_PORT | 8090 | 实时网关端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | SNAPSHOT_CHANNEL_CAPACITY | 1024 | 快照广播通道容量 |
/// | COMMAND_QUEUE_DEPTH | 256 | 指令队列深度 |
/// | SNAPSHOT_TAIL | 10 | 快照中的出价记录条数 |
/// | ROSTER_CAP | 25 | 每队阵容上限 |
/// | CATALOG_SEED | (unset) | 目录种子 JSON 路径 |
/// | TLS_CERT_PATH | (unset) | TLS 证书 PEM 路径 |
/// | TLS_KEY_PATH | (unset) | TLS 私钥 PEM 路径 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/auction GATEWAY_PORT=9000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库、日志等文件
    pub work_dir: String,
    /// 实时网关端口 (客户端直连)
    pub gateway_port: u16,
    /// JWT 认证配置
    pub jwt: JwtConfig,
    /// 运行环境: development | staging | production
    pub environment: String,

    /// 快照广播通道容量
    pub snapshot_channel_capacity: usize,
    /// 指令队列深度
    pub command_queue_depth: usize,
    /// 快照中包含的最近出价条数
    pub snapshot_tail: usize,
    /// 每队阵容上限
    pub roster_cap: u32,
    /// 目录种子文件 (仅在目录为空时导入)
    pub catalog_seed: Option<String>,
    /// TLS 证书路径 (PEM)
    pub tls_cert_path: Option<String>,
    /// TLS 私钥路径 (PEM)
    pub tls_key_path: Option<String>,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/auction".into()),
            gateway_port: std::env::var("GATEWAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8090),
            jwt: JwtConfig::default(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            snapshot_channel_capacity: std::env::var("SNAPSHOT_CHANNEL_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1024),
            command_queue_depth: std::env::var("COMMAND_QUEUE_DEPTH")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(256),
            snapshot_tail: std::env::var("SNAPSHOT_TAIL")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10),
            roster_cap: std::env::var("ROSTER_CAP")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(25),
            catalog_seed: std::env::var("CATALOG_SEED").ok(),
            tls_cert_path: std::env::var("TLS_CERT_PATH").ok(),
            tls_key_path: std::env::var("TLS_KEY_PATH").ok(),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, gateway_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.gateway_port = gateway_port;
        config
    }

    /// 确保工作目录结构存在
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.database_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }

    /// 数据库目录
    pub fn database_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("database")
    }

    /// 目录数据库文件路径
    pub fn catalog_db_path(&self) -> PathBuf {
        self.database_dir().join("auction.redb")
    }

    /// 日志目录
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    /// 网关监听地址
    pub fn gateway_listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.gateway_port)
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
