//! Application state module
//!
//! Contains the shared state used across all connections of one service.

use std::sync::Arc;

use tracing::info;

use crate::admission::AdmissionController;
use crate::config::ServerConfig;
use crate::crypto::CipherTransport;
use crate::error::Result;
use crate::net::session::SessionManager;
use crate::protocol::CommandRouter;

/// State shared by the listener and every session
pub struct AppState {
    /// Engine configuration
    pub config: ServerConfig,
    /// Per-address admission control
    pub admission: Arc<AdmissionController>,
    /// Cipher transport (None when no passphrase is configured)
    pub cipher: Option<Arc<CipherTransport>>,
    /// Service command router
    pub router: Arc<dyn CommandRouter>,
    /// Live session registry
    pub session_manager: SessionManager,
}

impl AppState {
    /// Create state with an admission controller built from the configuration
    pub fn new(config: ServerConfig, router: impl CommandRouter) -> Result<Self> {
        let admission = Arc::new(AdmissionController::from_config(
            &config.admission,
            config.max_requests(),
        ));
        Self::with_admission(config, Arc::new(router), admission)
    }

    /// Create state around an existing admission controller
    pub fn with_admission(
        config: ServerConfig,
        router: Arc<dyn CommandRouter>,
        admission: Arc<AdmissionController>,
    ) -> Result<Self> {
        let cipher = if config.cipher.passphrase.is_empty() {
            None
        } else {
            Some(Arc::new(CipherTransport::new(
                &config.cipher.passphrase,
                config.cipher.iv_mode,
            )?))
        };

        info!(
            service = %config.service,
            max_requests = admission.max_requests(),
            window_secs = admission.window().as_secs(),
            encryption = config.cipher.enabled,
            iv_mode = ?config.cipher.iv_mode,
            wire_mode = ?config.network.wire_mode,
            "Engine state initialized"
        );

        Ok(Self {
            config,
            admission,
            cipher,
            router,
            session_manager: SessionManager::new(),
        })
    }

    /// Cipher used for legacy decryption and outbound encryption, if enabled
    pub fn active_cipher(&self) -> Option<&CipherTransport> {
        if self.config.cipher.enabled {
            self.cipher.as_deref()
        } else {
            None
        }
    }
}
