//! Configuration and credential storage
//!
//! Everything the client persists lives in one flat record of optional
//! keys. Absence of a key is a valid state, never an error.

mod file;

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::auth::{Credentials, TokenState};
use crate::error::{Error, Result};
use crate::models::Plant;

pub use file::{cache_dir, FileStore};

/// Persisted key-value state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub app_key: Option<String>,
    pub secret_key: Option<String>,
    pub auth_url: Option<String>,
    pub gateway_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry in epoch milliseconds
    pub token_expiry: Option<i64>,
    pub selected_plant_id: Option<String>,
    /// Cached plant list (JSON stored as string for TOML compat)
    pub plant_list: Option<String>,
}

impl StoredState {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            app_key: self.app_key.clone().unwrap_or_default(),
            secret_key: self.secret_key.clone().unwrap_or_default(),
            auth_url: self.auth_url.clone().unwrap_or_default(),
            gateway_url: self.gateway_url.clone(),
        }
    }

    /// Current token triple, if an access token has been stored.
    pub fn token_state(&self) -> Option<TokenState> {
        let access_token = self.access_token.clone()?;
        Some(TokenState {
            access_token,
            refresh_token: self.refresh_token.clone().unwrap_or_default(),
            token_expiry: self.token_expiry.unwrap_or(0),
        })
    }

    pub fn set_token_state(&mut self, state: &TokenState) {
        self.access_token = Some(state.access_token.clone());
        self.refresh_token = Some(state.refresh_token.clone());
        self.token_expiry = Some(state.token_expiry);
    }

    /// Merge user-entered credential fields. Empty strings are stored as-is,
    /// they are what the user typed.
    pub fn set_credentials(&mut self, credentials: &Credentials) {
        self.app_key = Some(credentials.app_key.clone());
        self.secret_key = Some(credentials.secret_key.clone());
        self.auth_url = Some(credentials.auth_url.clone());
        if let Some(gateway) = &credentials.gateway_url {
            self.gateway_url = Some(gateway.clone());
        }
    }

    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.token_expiry = None;
    }

    pub fn plants(&self) -> Option<Vec<Plant>> {
        self.plant_list
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn set_plants(&mut self, plants: &[Plant]) -> Result<()> {
        let json = serde_json::to_string(plants)
            .map_err(|e| Error::Storage(format!("Failed to serialize plant list: {}", e)))?;
        self.plant_list = Some(json);
        Ok(())
    }
}

/// Durable key-value persistence shared by every component.
///
/// `update` is a single load-mutate-save; implementations serialize
/// concurrent updates so multi-key writes are never interleaved.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<StoredState>;

    fn update(&self, apply: &mut dyn FnMut(&mut StoredState)) -> Result<StoredState>;

    fn token_state(&self) -> Result<Option<TokenState>> {
        Ok(self.load()?.token_state())
    }

    fn clear_tokens(&self) -> Result<()> {
        self.update(&mut |state| state.clear_tokens()).map(|_| ())
    }

    fn store_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.update(&mut |state| state.set_credentials(credentials))
            .map(|_| ())
    }

    fn select_plant(&self, ps_id: &str) -> Result<()> {
        self.update(&mut |state| state.selected_plant_id = Some(ps_id.to_string()))
            .map(|_| ())
    }

    fn store_plants(&self, plants: &[Plant]) -> Result<()> {
        let mut outcome = Ok(());
        self.update(&mut |state| outcome = state.set_plants(plants))?;
        outcome
    }
}

/// Process-local store, used by tests and as a scratch store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoredState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoredState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<StoredState> {
        Ok(self.state.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut StoredState)) -> Result<StoredState> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut guard);
        Ok(guard.clone())
    }
}
