//! 统一错误处理
//!
//! Application-level errors for everything outside the command path.
//! Command rejections travel as [`shared::CommandError`] on the wire; this
//! type covers server plumbing (storage, gateway IO, configuration).

/// 应用错误枚举
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 无效身份声明 (连接被拒绝)
    #[error("Invalid token")]
    InvalidToken,

    /// 存储错误
    #[error("Storage error: {0}")]
    Storage(String),

    /// 内部错误
    #[error("Internal server error: {0}")]
    Internal(String),

    /// 无效请求 (配置、握手、畸形帧)
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Peer closed the connection (EOF or missing TLS close_notify).
    #[error("Client disconnected")]
    ClientDisconnected,
}

pub type AppResult<T> = Result<T, AppError>;

// ========== Helper Constructors ==========

impl AppError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl From<crate::catalog::StoreError> for AppError {
    fn from(e: crate::catalog::StoreError) -> Self {
        AppError::Storage(e.to_string())
    }
}
