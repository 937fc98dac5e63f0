//! Server Implementation
//!
//! 网关启动和生命周期管理

use crate::core::{Config, ServerState};
use crate::gateway::{ConnectionGateway, GatewayConfig, load_tls_config};
use crate::utils::{AppError, AppResult};

/// Auction server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state (for tests and tooling)
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> AppResult<()> {
        // Create application state if not provided
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config).await?,
        };

        // TLS is mandatory outside development
        let tls = match (&self.config.tls_cert_path, &self.config.tls_key_path) {
            (Some(cert), Some(key)) => Some(load_tls_config(cert, key)?),
            _ if self.config.is_production() => {
                tracing::error!("❌ TLS configuration missing. Refusing to start in production!");
                return Err(AppError::invalid(
                    "TLS_CERT_PATH/TLS_KEY_PATH must be set in production",
                ));
            }
            _ => None,
        };

        let gateway = ConnectionGateway::new(
            GatewayConfig {
                listen_addr: self.config.gateway_listen_addr(),
                tls,
            },
            state.engine.clone(),
            state.hub.clone(),
            state.get_jwt_service(),
        );

        tracing::info!(
            "🔨 Auction server starting on {}",
            self.config.gateway_listen_addr()
        );

        tokio::select! {
            result = gateway.run() => {
                if let Err(e) = &result {
                    tracing::error!("Gateway failed: {}", e);
                }
                result
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                gateway.shutdown();
                state.shutdown();
                Ok(())
            }
        }
    }
}
