//! Token lifecycle
//!
//! Exchanges authorization codes, refreshes tokens (single-flight), and
//! keeps the refresh timer armed. Every write to the token triple goes
//! through here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use super::flow::{authorization_code, authorization_url, AuthorizationFlow};
use super::scheduler::RefreshScheduler;
use super::tokens::{refresh_delay, Clock, TokenState};
use super::Credentials;
use crate::api::{Gateway, GatewayTarget, RefreshTokenRequest, TokenRequest};
use crate::config::{CredentialStore, StoredState};
use crate::error::{Error, Result};

type PendingRefresh = Shared<BoxFuture<'static, Result<TokenState>>>;

/// Token fields as persisted. Another process sharing the store shows up
/// as a change here.
type TokenStamp = (Option<String>, Option<String>, Option<i64>);

fn stamp(stored: &StoredState) -> TokenStamp {
    (
        stored.access_token.clone(),
        stored.refresh_token.clone(),
        stored.token_expiry,
    )
}

/// What the stored tokens must still look like for a result to be written.
enum Expect {
    /// Untouched since they were read.
    Unchanged(TokenStamp),
    /// Still present; a logout happened otherwise.
    NotCleared,
    /// There were no tokens to begin with.
    Anything,
}

impl Expect {
    fn holds(&self, stored: &StoredState) -> bool {
        match self {
            Expect::Unchanged(before) => stamp(stored) == *before,
            Expect::NotCleared => stored.access_token.is_some(),
            Expect::Anything => true,
        }
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    gateway: Arc<dyn Gateway>,
    flow: Arc<dyn AuthorizationFlow>,
    scheduler: Arc<dyn RefreshScheduler>,
    clock: Arc<dyn Clock>,
    /// Bumped by every exchange and every clear. A result computed under
    /// an older epoch is never committed.
    epoch: AtomicU64,
    in_flight: Mutex<Option<PendingRefresh>>,
    /// Expiry the refresh timer is armed for. Also serializes arming
    /// against `clear`.
    armed: Mutex<Option<i64>>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn Gateway>,
        flow: Arc<dyn AuthorizationFlow>,
        scheduler: Arc<dyn RefreshScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                flow,
                scheduler,
                clock,
                epoch: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                armed: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.inner.gateway
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Run the interactive authorization step and trade its code for tokens.
    pub async fn exchange(&self, credentials: &Credentials) -> Result<TokenState> {
        credentials.validate()?;
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let expect = if self.inner.store.load()?.access_token.is_some() {
            Expect::NotCleared
        } else {
            Expect::Anything
        };

        let redirect_url = self.inner.flow.redirect_url();
        let url = authorization_url(&credentials.auth_url, &redirect_url)?;
        tracing::debug!("Authorization URL: {}", url);

        let redirect = match self.inner.flow.launch(&url).await {
            Ok(redirect) => redirect,
            Err(e) => {
                tracing::warn!("Authorization step failed: {}", e);
                None
            }
        };
        let redirect = redirect
            .filter(|r| !r.trim().is_empty())
            .ok_or(Error::AuthFlowCancelled)?;
        let code = authorization_code(&redirect).ok_or(Error::AuthorizationMissing)?;

        let target = GatewayTarget {
            base_url: credentials.gateway_base(),
            secret_key: credentials.secret_key.clone(),
        };
        let request = TokenRequest::authorization_code(&credentials.app_key, code, redirect_url);
        tracing::info!("Exchanging authorization code at {}", target.base_url);
        let grant = self.inner.gateway.exchange_code(&target, &request).await?;

        let state = TokenState::issued(
            grant.access_token,
            grant.refresh_token.unwrap_or_default(),
            grant.expires_in,
            self.now_ms(),
        );
        let stored_credentials = Credentials {
            gateway_url: Some(target.base_url),
            ..credentials.clone()
        };
        self.commit(epoch, expect, |stored| {
            stored.set_credentials(&stored_credentials);
            stored.set_token_state(&state);
        })?;

        self.arm(epoch, &state, refresh_delay(grant.expires_in))?;
        tracing::info!("Signed in, token valid for {}s", grant.expires_in);
        Ok(state)
    }

    /// Refresh the access token. Concurrent callers share one request and
    /// all receive its outcome.
    pub async fn refresh(&self) -> Result<TokenState> {
        let pending = {
            let mut slot = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let manager = self.clone();
                    let pending = async move {
                        let result = manager.refresh_once().await;
                        manager
                            .inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn refresh_once(&self) -> Result<TokenState> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let stored = self.inner.store.load()?;
        let expect = Expect::Unchanged(stamp(&stored));

        let refresh_token = stored
            .refresh_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(Error::NoRefreshToken)?;
        let credentials = stored.credentials();
        let target = GatewayTarget {
            base_url: credentials.gateway_base(),
            secret_key: credentials.secret_key.clone(),
        };
        let request = RefreshTokenRequest {
            refresh_token: refresh_token.clone(),
            appkey: Some(credentials.app_key).filter(|key| !key.is_empty()),
        };

        tracing::info!("Refreshing access token...");
        let grant = self
            .inner
            .gateway
            .refresh_token(&target, &request)
            .await
            .map_err(|e| {
                tracing::warn!("Token refresh failed: {}", e);
                Error::RefreshFailed(e.to_string())
            })?;

        let state = TokenState::issued(
            grant.access_token,
            grant
                .refresh_token
                .filter(|token| !token.is_empty())
                .unwrap_or(refresh_token),
            grant.expires_in,
            self.now_ms(),
        );
        self.commit(epoch, expect, |stored| stored.set_token_state(&state))?;

        self.arm(epoch, &state, refresh_delay(grant.expires_in))?;
        tracing::info!("Token refreshed, valid for {}s", grant.expires_in);
        Ok(state)
    }

    /// Apply `write` in one store update, unless the epoch moved on or the
    /// stored tokens no longer match `expect`.
    fn commit(
        &self,
        epoch: u64,
        expect: Expect,
        write: impl FnOnce(&mut StoredState),
    ) -> Result<()> {
        let mut write = Some(write);
        let mut superseded = false;
        self.inner.store.update(&mut |stored| {
            if self.inner.epoch.load(Ordering::SeqCst) != epoch || !expect.holds(stored) {
                superseded = true;
                return;
            }
            if let Some(write) = write.take() {
                write(stored);
            }
        })?;

        if superseded {
            tracing::info!("Discarding token result from a superseded request");
            return Err(Error::Superseded);
        }
        Ok(())
    }

    /// Arm the refresh timer for a freshly committed `state`. A `clear`
    /// that slipped in after the commit wins.
    fn arm(&self, epoch: u64, state: &TokenState, delay: Duration) -> Result<()> {
        let mut armed = self.inner.armed.lock().unwrap_or_else(|e| e.into_inner());
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            tracing::info!("Tokens were cleared before the refresh timer was armed");
            return Err(Error::Superseded);
        }
        self.inner.scheduler.schedule_next_refresh(delay);
        *armed = Some(state.token_expiry);
        Ok(())
    }

    /// Forget the tokens. Credentials stay; anything in flight is discarded.
    pub fn clear(&self) -> Result<()> {
        {
            let mut armed = self.inner.armed.lock().unwrap_or_else(|e| e.into_inner());
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.scheduler.cancel_scheduled_refresh();
            *armed = None;
        }
        self.inner.store.clear_tokens()?;
        tracing::info!("Tokens cleared");
        Ok(())
    }

    /// Stored token triple, if any.
    pub fn current(&self) -> Result<Option<TokenState>> {
        self.inner.store.token_state()
    }

    pub fn is_valid(&self, state: Option<&TokenState>) -> bool {
        state.map_or(false, |s| super::is_valid(s, self.now_ms()))
    }

    /// Re-arm the refresh timer from the persisted expiry.
    pub fn resume_schedule(&self) -> Result<()> {
        let current = self.current()?;
        let mut armed = self.inner.armed.lock().unwrap_or_else(|e| e.into_inner());
        self.rearm(&mut armed, current);
        Ok(())
    }

    /// Follow token writes made by another process sharing the store.
    /// Re-arms the timer when the persisted expiry differs from the one it
    /// was armed for, and returns whether anything changed.
    pub fn sync_schedule(&self) -> Result<bool> {
        let current = self.current()?;
        let mut armed = self.inner.armed.lock().unwrap_or_else(|e| e.into_inner());
        let expiry = current
            .as_ref()
            .filter(|state| !state.refresh_token.is_empty())
            .map(|state| state.token_expiry);
        if *armed == expiry {
            return Ok(false);
        }
        tracing::info!("Stored tokens changed elsewhere, updating refresh schedule");
        self.rearm(&mut armed, current);
        Ok(true)
    }

    fn rearm(&self, armed: &mut Option<i64>, current: Option<TokenState>) {
        match current.filter(|state| !state.refresh_token.is_empty()) {
            Some(state) => {
                let delay = refresh_delay(state.remaining_secs(self.now_ms()));
                tracing::debug!("Refresh scheduled in {}s", delay.as_secs());
                self.inner.scheduler.schedule_next_refresh(delay);
                *armed = Some(state.token_expiry);
            }
            None => {
                if armed.take().is_some() {
                    self.inner.scheduler.cancel_scheduled_refresh();
                }
            }
        }
    }
}
