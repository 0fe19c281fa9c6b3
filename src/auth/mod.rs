//! Authentication module for iSolarCloud
//!
//! Implements the authorization-code exchange against the gateway, token
//! persistence and scheduled refresh, and the sign-in state machine.

pub mod flow;
pub mod manager;
pub mod orchestrator;
pub mod scheduler;
pub mod tokens;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use flow::{AuthorizationFlow, LoopbackFlow, UnavailableFlow};
pub use manager::TokenManager;
pub use orchestrator::AuthOrchestrator;
pub use scheduler::{NoopScheduler, RefreshScheduler, TimerScheduler};
pub use tokens::{format_expiry, is_valid, SystemClock, TokenState};

/// Gateway used when the user has not configured a regional one.
pub const DEFAULT_GATEWAY: &str = "https://augateway.isolarcloud.com";

/// User-supplied API credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub app_key: String,
    pub secret_key: String,
    /// Authorization page of the developer portal, possibly with query params
    pub auth_url: String,
    /// Regional gateway, e.g. https://augateway.isolarcloud.com
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
}

impl Credentials {
    /// App key, secret key and authorization URL must all be present
    /// before an exchange is attempted.
    pub fn validate(&self) -> Result<()> {
        let blank = [&self.app_key, &self.secret_key, &self.auth_url]
            .iter()
            .any(|field| field.trim().is_empty());
        if blank {
            return Err(Error::Validation(
                "App Key, Secret Key, and Authorization URL are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Gateway base URL without a trailing slash.
    pub fn gateway_base(&self) -> String {
        let base = self
            .gateway_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_GATEWAY);
        base.trim_end_matches('/').to_string()
    }
}
