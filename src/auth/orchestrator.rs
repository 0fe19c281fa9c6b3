//! Sign-in state machine
//!
//! Unauthenticated -> Authenticating -> Authenticated -> (Refreshing) ->
//! Authenticated or Error. Failures of the token lifecycle become state
//! here; callers still get the typed result.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use super::manager::TokenManager;
use super::tokens::TokenState;
use super::Credentials;
use crate::config::CredentialStore;
use crate::error::{Error, Result};

pub const TOKEN_EXPIRED_NOTICE: &str = "Token expired";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated { notice: Option<String> },
    Authenticating,
    Authenticated,
    Refreshing,
    Error(String),
}

impl AuthState {
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated { .. } => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
            AuthState::Refreshing => "refreshing",
            AuthState::Error(_) => "error",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            AuthState::Unauthenticated { notice } => notice.as_deref(),
            AuthState::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{} ({})", self.label(), msg),
            None => f.write_str(self.label()),
        }
    }
}

/// Snapshot for `status` and `getStatus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub has_credentials: bool,
    pub token_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_plant_id: Option<String>,
}

pub struct AuthOrchestrator {
    tokens: TokenManager,
    state: Mutex<AuthState>,
    /// Bumped by every sign-in attempt and logout. Outcomes of an older
    /// attempt do not touch the state.
    attempt: AtomicU64,
}

impl AuthOrchestrator {
    pub fn new(tokens: TokenManager) -> Self {
        Self {
            tokens,
            state: Mutex::new(AuthState::Unauthenticated { notice: None }),
            attempt: AtomicU64::new(0),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn state(&self) -> AuthState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, next: AuthState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            tracing::debug!("Auth state: {} -> {}", state, next);
        }
        *state = next;
    }

    /// Set `next` only if no newer attempt or logout has happened.
    fn settle(&self, attempt: u64, next: AuthState) {
        if self.attempt.load(Ordering::SeqCst) == attempt {
            self.set_state(next);
        }
    }

    /// Initial state from persisted tokens.
    pub fn start(&self) -> Result<AuthState> {
        let next = match self.tokens.current()? {
            Some(state) if self.tokens.is_valid(Some(&state)) => AuthState::Authenticated,
            Some(_) => AuthState::Unauthenticated {
                notice: Some(TOKEN_EXPIRED_NOTICE.to_string()),
            },
            None => AuthState::Unauthenticated { notice: None },
        };
        self.set_state(next.clone());
        Ok(next)
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<TokenState> {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(AuthState::Authenticating);

        let result = self.tokens.exchange(credentials).await;
        match &result {
            Ok(_) => self.settle(attempt, AuthState::Authenticated),
            Err(Error::Superseded) => {}
            Err(e) => self.settle(attempt, AuthState::Error(e.to_string())),
        }
        result
    }

    /// Refresh the token. While a sign-in is running the refresh happens
    /// without touching the state. With no refresh token stored there is
    /// no session to refresh and the state stays as it is.
    pub async fn refresh(&self) -> Result<TokenState> {
        let stored = self.tokens.store().load()?;
        if stored.refresh_token.as_deref().map_or(true, str::is_empty) {
            return Err(Error::NoRefreshToken);
        }
        if self.state() == AuthState::Authenticating {
            return self.tokens.refresh().await;
        }

        let attempt = self.attempt.load(Ordering::SeqCst);
        self.set_state(AuthState::Refreshing);

        let result = self.tokens.refresh().await;
        match &result {
            Ok(_) => self.settle(attempt, AuthState::Authenticated),
            // Tokens were replaced by another writer; follow the store.
            Err(Error::Superseded) if self.attempt.load(Ordering::SeqCst) == attempt => {
                if let Err(e) = self.start() {
                    tracing::warn!("Failed to reload auth state: {}", e);
                }
            }
            Err(Error::Superseded) => {}
            Err(e) => self.settle(attempt, AuthState::Error(e.to_string())),
        }
        result
    }

    /// The stored token when valid, otherwise the outcome of a refresh.
    pub async fn usable_token(&self) -> Result<TokenState> {
        match self.tokens.current()? {
            Some(state) if self.tokens.is_valid(Some(&state)) => Ok(state),
            Some(state) if !state.refresh_token.is_empty() => {
                tracing::info!("Access token expired, refreshing before the request");
                match self.refresh().await {
                    // Someone else replaced the tokens meanwhile; use theirs.
                    Err(Error::Superseded) => match self.tokens.current()? {
                        Some(state) if self.tokens.is_valid(Some(&state)) => Ok(state),
                        _ => Err(Error::NotAuthenticated),
                    },
                    result => result,
                }
            }
            _ => Err(Error::NotAuthenticated),
        }
    }

    /// Pick up token changes written by another process: re-arm the
    /// refresh timer and, unless a sign-in or refresh is running, re-derive
    /// the state from the store.
    pub fn sync(&self) -> Result<()> {
        if !self.tokens.sync_schedule()? {
            return Ok(());
        }
        match self.state() {
            AuthState::Authenticating | AuthState::Refreshing => {}
            _ => {
                let state = self.start()?;
                tracing::info!("Auth state now {}", state);
            }
        }
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.tokens.clear()?;
        self.set_state(AuthState::Unauthenticated { notice: None });
        tracing::info!("Logged out");
        Ok(())
    }

    /// A stored token that is still within its lifetime, whatever the
    /// state says (a failed refresh leaves the old token usable).
    pub fn has_usable_token(&self) -> bool {
        match self.tokens.current() {
            Ok(state) => self.tokens.is_valid(state.as_ref()),
            Err(e) => {
                tracing::warn!("Failed to read token state: {}", e);
                false
            }
        }
    }

    pub fn status(&self) -> Result<AuthStatus> {
        let stored = self.tokens.store().load()?;
        let token = stored.token_state();
        let state = self.state();
        Ok(AuthStatus {
            state: state.label(),
            message: state.message().map(str::to_string),
            has_credentials: stored.credentials().validate().is_ok(),
            token_valid: self.tokens.is_valid(token.as_ref()),
            token_expiry: token.map(|t| t.token_expiry),
            selected_plant_id: stored.selected_plant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::assert_pending;

    use super::*;
    use crate::auth::scheduler::RecordingScheduler;
    use crate::auth::tokens::ManualClock;
    use crate::config::{MemoryStore, StoredState};
    use crate::testing::{credentials, FakeFlow, FakeGateway, NOW_MS};

    struct Harness {
        auth: AuthOrchestrator,
        store: Arc<MemoryStore>,
        gateway: Arc<FakeGateway>,
        clock: Arc<ManualClock>,
    }

    fn harness(state: StoredState) -> Harness {
        let store = Arc::new(MemoryStore::with_state(state));
        let gateway = Arc::new(FakeGateway::new());
        let clock = Arc::new(ManualClock::at(NOW_MS));
        let tokens = TokenManager::new(
            store.clone(),
            gateway.clone(),
            Arc::new(FakeFlow::returning_code("ABC")),
            Arc::new(RecordingScheduler::default()),
            clock.clone(),
        );
        Harness {
            auth: AuthOrchestrator::new(tokens),
            store,
            gateway,
            clock,
        }
    }

    fn signed_in() -> StoredState {
        StoredState {
            app_key: Some("app".into()),
            secret_key: Some("secret".into()),
            auth_url: Some("https://portal.example/authorize".into()),
            access_token: Some("T1".into()),
            refresh_token: Some("R1".into()),
            token_expiry: Some(NOW_MS + 3_600_000),
            selected_plant_id: Some("1234".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_reflects_persisted_token() {
        let h = harness(signed_in());
        assert_eq!(h.auth.start().unwrap(), AuthState::Authenticated);

        h.clock.advance_ms(3_600_000);
        assert_eq!(
            h.auth.start().unwrap(),
            AuthState::Unauthenticated {
                notice: Some("Token expired".into())
            }
        );

        let h = harness(StoredState::default());
        assert_eq!(
            h.auth.start().unwrap(),
            AuthState::Unauthenticated { notice: None }
        );
    }

    #[tokio::test]
    async fn test_authenticate_success_and_failure() {
        let h = harness(StoredState::default());
        h.auth.authenticate(&credentials()).await.unwrap();
        assert_eq!(h.auth.state(), AuthState::Authenticated);

        h.gateway
            .set_exchange(Err(Error::api("0", "invalid app key")));
        assert!(h.auth.authenticate(&credentials()).await.is_err());
        assert_eq!(h.auth.state(), AuthState::Error("invalid app key".into()));

        // a new attempt clears the error
        h.gateway
            .set_exchange(Ok(crate::testing::grant("T9", Some("R9"), 3600)));
        h.auth.authenticate(&credentials()).await.unwrap();
        assert_eq!(h.auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_token_usable() {
        let h = harness(signed_in());
        h.auth.start().unwrap();
        h.gateway
            .set_refresh(Err(Error::Transport("timeout".into())));

        assert!(h.auth.refresh().await.is_err());
        assert!(matches!(h.auth.state(), AuthState::Error(_)));
        assert!(h.auth.has_usable_token());

        h.clock.advance_ms(3_600_000);
        assert!(!h.auth.has_usable_token());
    }

    #[tokio::test]
    async fn test_refresh_transitions_back_to_authenticated() {
        let h = harness(signed_in());
        h.auth.start().unwrap();
        let gate = h.gateway.hold_refresh();

        let mut refresh = tokio_test::task::spawn(h.auth.refresh());
        assert_pending!(refresh.poll());
        assert_eq!(h.auth.state(), AuthState::Refreshing);

        gate.notify_one();
        refresh.await.unwrap();
        assert_eq!(h.auth.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_logout_keeps_credentials() {
        let h = harness(signed_in());
        h.auth.start().unwrap();
        h.auth.logout().unwrap();

        assert_eq!(h.auth.state(), AuthState::Unauthenticated { notice: None });
        let stored = h.store.load().unwrap();
        assert_eq!(stored.token_state(), None);
        assert_eq!(stored.credentials().app_key, "app");
        assert_eq!(stored.credentials().secret_key, "secret");
        assert!(!h.auth.has_usable_token());
    }

    #[tokio::test]
    async fn test_logout_during_authenticate_wins() {
        let h = harness(StoredState::default());
        let gate = h.gateway.hold_exchange();

        let creds = credentials();
        let mut attempt = tokio_test::task::spawn(h.auth.authenticate(&creds));
        assert_pending!(attempt.poll());
        assert_eq!(h.auth.state(), AuthState::Authenticating);

        h.auth.logout().unwrap();
        gate.notify_one();

        assert_eq!(attempt.await.unwrap_err(), Error::Superseded);
        assert_eq!(h.auth.state(), AuthState::Unauthenticated { notice: None });
        assert_eq!(h.store.token_state().unwrap(), None);
    }

    #[tokio::test]
    async fn test_usable_token_refreshes_only_when_expired() {
        let h = harness(signed_in());
        assert_eq!(h.auth.usable_token().await.unwrap().access_token, "T1");
        assert_eq!(h.gateway.count("refresh_token"), 0);

        h.clock.advance_ms(3_600_000);
        assert_eq!(h.auth.usable_token().await.unwrap().access_token, "T2");
        assert_eq!(h.gateway.count("refresh_token"), 1);
        assert_eq!(h.auth.state(), AuthState::Authenticated);

        let h = harness(StoredState::default());
        assert_eq!(
            h.auth.usable_token().await.unwrap_err(),
            Error::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn test_refresh_without_session_keeps_state() {
        let h = harness(StoredState::default());
        h.auth.start().unwrap();

        assert_eq!(h.auth.refresh().await.unwrap_err(), Error::NoRefreshToken);
        assert_eq!(h.auth.state(), AuthState::Unauthenticated { notice: None });
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_usable_token_takes_tokens_refreshed_elsewhere() {
        let h = harness(signed_in());
        h.auth.start().unwrap();
        h.clock.advance_ms(3_600_000);
        let gate = h.gateway.hold_refresh();

        let mut request = tokio_test::task::spawn(h.auth.usable_token());
        assert_pending!(request.poll());

        // Another process refreshes first.
        h.store
            .update(&mut |stored| {
                stored.access_token = Some("T5".into());
                stored.refresh_token = Some("R5".into());
                stored.token_expiry = Some(NOW_MS + 7_200_000);
            })
            .unwrap();
        gate.notify_one();

        assert_eq!(request.await.unwrap().access_token, "T5");
        assert_eq!(h.store.token_state().unwrap().unwrap().access_token, "T5");
        assert_eq!(h.auth.state(), AuthState::Authenticated);
    }

    #[test]
    fn test_sync_follows_tokens_written_elsewhere() {
        let h = harness(StoredState::default());
        h.auth.start().unwrap();

        h.store.update(&mut |stored| *stored = signed_in()).unwrap();
        h.auth.sync().unwrap();
        assert_eq!(h.auth.state(), AuthState::Authenticated);

        h.store.clear_tokens().unwrap();
        h.auth.sync().unwrap();
        assert_eq!(h.auth.state(), AuthState::Unauthenticated { notice: None });
    }

    #[test]
    fn test_status_snapshot() {
        let h = harness(signed_in());
        h.auth.start().unwrap();
        let status = h.auth.status().unwrap();
        assert_eq!(status.state, "authenticated");
        assert!(status.has_credentials);
        assert!(status.token_valid);
        assert_eq!(status.token_expiry, Some(NOW_MS + 3_600_000));
        assert_eq!(status.selected_plant_id.as_deref(), Some("1234"));
    }
}
