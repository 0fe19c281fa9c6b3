//! Command dispatcher
//!
//! A closed set of commands, each mapped to one handler. Every command
//! resolves to `{success, data?, error?}`; failures never escape as panics
//! or transport errors.

pub mod daemon;

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::api::{Gateway, PointQuery, Session};
use crate::auth::{AuthOrchestrator, Credentials};
use crate::badge::BadgePoller;
use crate::config::{CredentialStore, StoredState};
use crate::error::{Error, Result};
use crate::models::{DevicePoint, Plant, PlantDevice, PointId};

/// Requests accepted by the service, `{"action": "...", ...}` on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    Authenticate {
        credentials: Credentials,
    },
    GetStoredCredentials,
    StoreCredentials {
        credentials: Credentials,
    },
    RefreshToken,
    /// Cached list unless `refresh` is set or nothing is cached yet.
    GetPlantList {
        #[serde(default)]
        refresh: bool,
    },
    GetDeviceList {
        ps_id: u64,
    },
    GetDevicePointData {
        device_type: i64,
        ps_key: String,
        point_ids: Vec<PointId>,
    },
    Logout,
    SelectPlant {
        #[serde(deserialize_with = "id_string")]
        ps_id: String,
    },
    GetStatus,
}

impl Command {
    /// Wire name of the command.
    pub fn action(&self) -> &'static str {
        match self {
            Command::Authenticate { .. } => "authenticate",
            Command::GetStoredCredentials => "getStoredCredentials",
            Command::StoreCredentials { .. } => "storeCredentials",
            Command::RefreshToken => "refreshToken",
            Command::GetPlantList { .. } => "getPlantList",
            Command::GetDeviceList { .. } => "getDeviceList",
            Command::GetDevicePointData { .. } => "getDevicePointData",
            Command::Logout => "logout",
            Command::SelectPlant { .. } => "selectPlant",
            Command::GetStatus => "getStatus",
        }
    }
}

/// Plant ids arrive as numbers from some callers and strings from others.
fn id_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid plant id: {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Echo of the request's `id`, when it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            id: None,
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            id: None,
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }
}

/// Stored keys as `getStoredCredentials` reports them. The cached plant
/// list is left out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredView {
    #[serde(skip_serializing_if = "Option::is_none")]
    app_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected_plant_id: Option<String>,
}

impl From<StoredState> for StoredView {
    fn from(s: StoredState) -> Self {
        Self {
            app_key: s.app_key,
            secret_key: s.secret_key,
            auth_url: s.auth_url,
            gateway_url: s.gateway_url,
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            token_expiry: s.token_expiry,
            selected_plant_id: s.selected_plant_id,
        }
    }
}

/// Parse one request line. Malformed input becomes a failed reply.
pub fn parse_request(line: &str) -> std::result::Result<(Option<Value>, Command), Reply> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Reply::failed(format!("Invalid request: {}", e)))?;
    let id = value.get("id").cloned();
    let command = serde_json::from_value(value)
        .map_err(|e| Reply::failed(format!("Invalid command: {}", e)).with_id(id.clone()))?;
    Ok((id, command))
}

pub struct Service {
    auth: Arc<AuthOrchestrator>,
    badge: Arc<BadgePoller>,
}

impl Service {
    pub fn new(auth: Arc<AuthOrchestrator>, badge: Arc<BadgePoller>) -> Self {
        Self { auth, badge }
    }

    pub fn auth(&self) -> &Arc<AuthOrchestrator> {
        &self.auth
    }

    pub fn badge(&self) -> &Arc<BadgePoller> {
        &self.badge
    }

    fn store(&self) -> &Arc<dyn CredentialStore> {
        self.auth.tokens().store()
    }

    fn gateway(&self) -> &Arc<dyn Gateway> {
        self.auth.tokens().gateway()
    }

    pub async fn handle(&self, command: Command) -> Reply {
        let action = command.action();
        tracing::debug!("Handling {}", action);
        match self.dispatch(command).await {
            Ok(data) => Reply::ok(data),
            Err(e) => {
                tracing::debug!("{} failed: {}", action, e);
                Reply::failed(e)
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<Option<Value>> {
        match command {
            Command::Authenticate { credentials } => {
                let state = self.auth.authenticate(&credentials).await?;
                to_data(&serde_json::json!({
                    "authenticated": true,
                    "tokenExpiry": state.token_expiry,
                }))
            }
            Command::GetStoredCredentials => {
                to_data(&StoredView::from(self.store().load()?))
            }
            Command::StoreCredentials { credentials } => {
                self.store_credentials(&credentials)?;
                Ok(None)
            }
            Command::RefreshToken => {
                let state = self.auth.refresh().await?;
                to_data(&serde_json::json!({
                    "success": true,
                    "tokenExpiry": state.token_expiry,
                }))
            }
            Command::GetPlantList { refresh } => to_data(&self.plant_list(refresh).await?),
            Command::GetDeviceList { ps_id } => to_data(&self.device_list(ps_id).await?),
            Command::GetDevicePointData {
                device_type,
                ps_key,
                point_ids,
            } => {
                let query = PointQuery {
                    device_type,
                    ps_key,
                    point_ids,
                };
                to_data(&self.device_points(&query).await?)
            }
            Command::Logout => {
                self.logout().await?;
                Ok(None)
            }
            Command::SelectPlant { ps_id } => {
                let badge = self.select_plant(&ps_id).await?;
                to_data(&serde_json::json!({ "psId": ps_id.trim(), "badge": badge }))
            }
            Command::GetStatus => to_data(&self.auth.status()?),
        }
    }

    pub fn store_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.store().store_credentials(credentials)?;
        tracing::info!("Credentials saved");
        Ok(())
    }

    /// Plants visible to the account, from the cache unless `refresh`.
    pub async fn plant_list(&self, refresh: bool) -> Result<Vec<Plant>> {
        if !refresh {
            if let Some(plants) = self.store().load()?.plants() {
                tracing::debug!("Using cached plant list");
                return Ok(plants);
            }
        }
        let session = self.session().await?;
        let plants = self.gateway().plant_list(&session).await?;
        self.store().store_plants(&plants)?;
        Ok(plants)
    }

    pub async fn device_list(&self, ps_id: u64) -> Result<Vec<PlantDevice>> {
        let session = self.session().await?;
        self.gateway().device_list(&session, ps_id).await
    }

    pub async fn device_points(&self, query: &PointQuery) -> Result<Vec<DevicePoint>> {
        let session = self.session().await?;
        self.gateway().device_points(&session, query).await
    }

    /// Remember the plant and update the badge for it right away.
    pub async fn select_plant(&self, ps_id: &str) -> Result<Option<String>> {
        let ps_id = ps_id.trim();
        if ps_id.is_empty() {
            return Err(Error::Validation("Plant id is required".to_string()));
        }
        self.store().select_plant(ps_id)?;
        tracing::info!("Selected plant {}", ps_id);
        Ok(self.badge.tick().await)
    }

    /// Periodic badge update. Tokens written by another process (a CLI
    /// `login` or `logout`) are picked up first, so the refresh timer
    /// follows them.
    pub async fn poll_badge(&self) -> Option<String> {
        if let Err(e) = self.auth.sync() {
            tracing::warn!("Failed to sync stored tokens: {}", e);
        }
        self.badge.tick().await
    }

    pub async fn logout(&self) -> Result<()> {
        self.auth.logout()?;
        self.badge.tick().await;
        Ok(())
    }

    /// Session for a platform call, refreshing an expired token first.
    pub async fn session(&self) -> Result<Session> {
        let stored = self.store().load()?;
        let session = Session::from_state(&stored)?;
        let token = self.auth.usable_token().await?;
        Ok(Session {
            access_token: token.access_token,
            ..session
        })
    }
}

fn to_data<T: Serialize + ?Sized>(data: &T) -> Result<Option<Value>> {
    serde_json::to_value(data)
        .map(Some)
        .map_err(|e| Error::Decode(e.to_string()))
}
