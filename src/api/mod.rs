//! iSolarCloud OpenAPI gateway
//!
//! Every call is a JSON POST to `<gateway><endpoint>` carrying the secret
//! key in `x-access-key`. Platform endpoints also need a bearer token.

pub mod client;
pub mod endpoint;
pub mod envelope;
pub mod requests;

use async_trait::async_trait;

use crate::config::StoredState;
use crate::error::{Error, Result};
use crate::models::{DevicePoint, Plant, PlantDevice};

pub use client::GatewayClient;
pub use requests::{PointQuery, RefreshTokenRequest, TokenGrant, TokenRequest};

/// Regional gateway plus the secret key that opens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    pub base_url: String,
    pub secret_key: String,
}

/// Everything an authenticated platform call needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub target: GatewayTarget,
    pub app_key: String,
    pub access_token: String,
}

impl Session {
    /// Session for the stored credentials and token.
    ///
    /// Missing keys are a validation failure; a missing token means the
    /// user has not signed in.
    pub fn from_state(state: &StoredState) -> Result<Self> {
        let credentials = state.credentials();
        if credentials.app_key.trim().is_empty() || credentials.secret_key.trim().is_empty() {
            return Err(Error::Validation("Missing credentials".to_string()));
        }
        let access_token = state
            .access_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(Error::NotAuthenticated)?;

        Ok(Self {
            target: GatewayTarget {
                base_url: credentials.gateway_base(),
                secret_key: credentials.secret_key,
            },
            app_key: credentials.app_key,
            access_token,
        })
    }
}

/// The remote operations the client depends on.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn exchange_code(&self, target: &GatewayTarget, request: &TokenRequest)
        -> Result<TokenGrant>;

    async fn refresh_token(
        &self,
        target: &GatewayTarget,
        request: &RefreshTokenRequest,
    ) -> Result<TokenGrant>;

    /// First page of plants visible to the token (up to 10).
    async fn plant_list(&self, session: &Session) -> Result<Vec<Plant>>;

    /// Devices of one plant (up to 50).
    async fn device_list(&self, session: &Session, ps_id: u64) -> Result<Vec<PlantDevice>>;

    async fn device_points(&self, session: &Session, query: &PointQuery)
        -> Result<Vec<DevicePoint>>;
}
