//! Shared test infrastructure: fake gateway, fake interactive flow, fixtures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use url::Url;

use crate::api::{Gateway, GatewayTarget, PointQuery, RefreshTokenRequest, Session, TokenGrant, TokenRequest};
use crate::auth::Credentials;
use crate::error::Result;
use crate::models::{DevicePoint, Plant, PlantDevice, BATTERY_DEVICE_TYPE};

pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn grant(access: &str, refresh: Option<&str>, expires_in: u64) -> TokenGrant {
    TokenGrant {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_in,
        token_type: Some("bearer".to_string()),
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        app_key: "app".to_string(),
        secret_key: "secret".to_string(),
        auth_url: "https://portal.example/authorize?cloudId=3".to_string(),
        gateway_url: None,
    }
}

pub fn plant(ps_id: u64, name: &str) -> Plant {
    Plant {
        ps_id,
        ps_name: name.to_string(),
        ..Default::default()
    }
}

pub fn device(device_type: i64, ps_key: &str) -> PlantDevice {
    PlantDevice {
        device_type,
        ps_key: ps_key.to_string(),
        device_name: format!("device {}", ps_key),
        ..Default::default()
    }
}

pub fn battery(ps_key: &str) -> PlantDevice {
    device(BATTERY_DEVICE_TYPE, ps_key)
}

/// Telemetry row built from raw gateway JSON fields.
pub fn point_row(ps_key: &str, fields: Value) -> DevicePoint {
    let mut raw = json!({ "ps_key": ps_key });
    if let (Some(raw), Some(fields)) = (raw.as_object_mut(), fields.as_object()) {
        raw.extend(fields.clone());
    }
    serde_json::from_value(raw).unwrap()
}

/// Scriptable `Gateway` that records every call.
pub struct FakeGateway {
    exchange: Mutex<Result<TokenGrant>>,
    refresh: Mutex<Result<TokenGrant>>,
    plants: Mutex<Result<Vec<Plant>>>,
    devices: Mutex<Result<Vec<PlantDevice>>>,
    points: Mutex<Result<Vec<DevicePoint>>>,
    exchange_gate: Mutex<Option<Arc<Notify>>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
    refresh_requests: Mutex<Vec<RefreshTokenRequest>>,
    exchange_requests: Mutex<Vec<(GatewayTarget, TokenRequest)>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            exchange: Mutex::new(Ok(grant("T1", Some("R1"), 3600))),
            refresh: Mutex::new(Ok(grant("T2", Some("R2"), 3600))),
            plants: Mutex::new(Ok(Vec::new())),
            devices: Mutex::new(Ok(Vec::new())),
            points: Mutex::new(Ok(Vec::new())),
            exchange_gate: Mutex::new(None),
            refresh_gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            refresh_requests: Mutex::new(Vec::new()),
            exchange_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_exchange(&self, result: Result<TokenGrant>) {
        *self.exchange.lock().unwrap() = result;
    }

    pub fn set_refresh(&self, result: Result<TokenGrant>) {
        *self.refresh.lock().unwrap() = result;
    }

    pub fn set_plants(&self, result: Result<Vec<Plant>>) {
        *self.plants.lock().unwrap() = result;
    }

    pub fn set_devices(&self, result: Result<Vec<PlantDevice>>) {
        *self.devices.lock().unwrap() = result;
    }

    pub fn set_points(&self, result: Result<Vec<DevicePoint>>) {
        *self.points.lock().unwrap() = result;
    }

    /// Make token exchanges wait until the returned handle is notified.
    pub fn hold_exchange(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.exchange_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Make refreshes wait until the returned handle is notified.
    pub fn hold_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Every call so far, e.g. `["plant_list", "device_list:1234"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn refresh_requests(&self) -> Vec<RefreshTokenRequest> {
        self.refresh_requests.lock().unwrap().clone()
    }

    pub fn exchange_requests(&self) -> Vec<(GatewayTarget, TokenRequest)> {
        self.exchange_requests.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

async fn pass(gate: &Mutex<Option<Arc<Notify>>>) {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn exchange_code(
        &self,
        target: &GatewayTarget,
        request: &TokenRequest,
    ) -> Result<TokenGrant> {
        self.record("exchange_code".to_string());
        self.exchange_requests
            .lock()
            .unwrap()
            .push((target.clone(), request.clone()));
        pass(&self.exchange_gate).await;
        self.exchange.lock().unwrap().clone()
    }

    async fn refresh_token(
        &self,
        _target: &GatewayTarget,
        request: &RefreshTokenRequest,
    ) -> Result<TokenGrant> {
        self.record("refresh_token".to_string());
        self.refresh_requests.lock().unwrap().push(request.clone());
        pass(&self.refresh_gate).await;
        self.refresh.lock().unwrap().clone()
    }

    async fn plant_list(&self, session: &Session) -> Result<Vec<Plant>> {
        self.record(format!("plant_list:{}", session.access_token));
        self.plants.lock().unwrap().clone()
    }

    async fn device_list(&self, _session: &Session, ps_id: u64) -> Result<Vec<PlantDevice>> {
        self.record(format!("device_list:{}", ps_id));
        self.devices.lock().unwrap().clone()
    }

    async fn device_points(
        &self,
        _session: &Session,
        query: &PointQuery,
    ) -> Result<Vec<DevicePoint>> {
        self.record(format!("device_points:{}", query.ps_key));
        self.points.lock().unwrap().clone()
    }
}

/// Interactive step that answers with a fixed redirect.
pub struct FakeFlow {
    redirect: Mutex<Option<String>>,
    launched: Mutex<Vec<Url>>,
}

impl FakeFlow {
    pub const REDIRECT: &'static str = "https://ext.example/redirect";

    /// Flow that comes back with `?code=<code>`.
    pub fn returning_code(code: &str) -> Self {
        Self::returning(Some(format!("{}?code={}", Self::REDIRECT, code)))
    }

    pub fn returning(redirect: Option<String>) -> Self {
        Self {
            redirect: Mutex::new(redirect),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<Url> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl crate::auth::AuthorizationFlow for FakeFlow {
    fn redirect_url(&self) -> String {
        Self::REDIRECT.to_string()
    }

    async fn launch(&self, url: &Url) -> Result<Option<String>> {
        self.launched.lock().unwrap().push(url.clone());
        Ok(self.redirect.lock().unwrap().clone())
    }
}
