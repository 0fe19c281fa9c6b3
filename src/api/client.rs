//! HTTP client for the gateway
//!
//! Wraps reqwest::Client with the access-key header, bearer injection and
//! envelope decoding.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::endpoint::{self, Endpoint};
use super::envelope::{self, Envelope};
use super::requests::{
    DeviceListRequest, DevicePointRequest, PlantListRequest, PointQuery, RefreshTokenRequest,
    TokenGrant, TokenRequest,
};
use super::{Gateway, GatewayTarget, Session};
use crate::error::{Error, Result};
use crate::models::{DevicePage, DevicePoint, DevicePointPage, Plant, PlantDevice, PlantPage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PLANT_PAGE_SIZE: u32 = 10;
const DEVICE_PAGE_SIZE: u32 = 50;

/// reqwest-backed `Gateway`.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// POST `body` to `endpoint` and decode the envelope's `result_data`.
    async fn post<B, T>(
        &self,
        target: &GatewayTarget,
        endpoint: &Endpoint,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", target.base_url, endpoint);
        tracing::debug!("Gateway POST {}", url);

        let mut request = self
            .http
            .post(&url)
            .header("x-access-key", &target.secret_key)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {}", url, e)))?;
        check_response(resp, &url).await
    }
}

/// Decode a gateway response.
///
/// A rejection carried in the envelope wins over the HTTP status, since the
/// gateway reports business errors that way regardless of status.
async fn check_response<T: DeserializeOwned>(resp: reqwest::Response, url: &str) -> Result<T> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| Error::Transport(format!("Reading {} failed: {}", url, e)))?;

    if !status.is_success() {
        if let Ok(envelope) = serde_json::from_str::<Envelope>(&body) {
            if let Err(e @ Error::Api { .. }) = envelope.into_result::<serde_json::Value>() {
                return Err(e);
            }
        }
        tracing::debug!("HTTP {} body: {}", status.as_u16(), body);
        return Err(Error::Transport(format!("HTTP {} for {}", status.as_u16(), url)));
    }

    envelope::decode(&body)
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn exchange_code(
        &self,
        target: &GatewayTarget,
        request: &TokenRequest,
    ) -> Result<TokenGrant> {
        self.post(target, endpoint::TOKEN, None, request).await
    }

    async fn refresh_token(
        &self,
        target: &GatewayTarget,
        request: &RefreshTokenRequest,
    ) -> Result<TokenGrant> {
        self.post(target, endpoint::REFRESH_TOKEN, None, request).await
    }

    async fn plant_list(&self, session: &Session) -> Result<Vec<Plant>> {
        let body = PlantListRequest {
            appkey: session.app_key.clone(),
            page: 1,
            size: PLANT_PAGE_SIZE,
        };
        let page: PlantPage = self
            .post(
                &session.target,
                endpoint::PLANT_LIST,
                Some(&session.access_token),
                &body,
            )
            .await?;
        Ok(page.page_list)
    }

    async fn device_list(&self, session: &Session, ps_id: u64) -> Result<Vec<PlantDevice>> {
        let body = DeviceListRequest {
            appkey: session.app_key.clone(),
            ps_id: ps_id.to_string(),
            page: 1,
            size: DEVICE_PAGE_SIZE,
        };
        let page: DevicePage = self
            .post(
                &session.target,
                endpoint::DEVICE_LIST,
                Some(&session.access_token),
                &body,
            )
            .await?;
        Ok(page.page_list)
    }

    async fn device_points(
        &self,
        session: &Session,
        query: &PointQuery,
    ) -> Result<Vec<DevicePoint>> {
        let body = DevicePointRequest::new(&session.app_key, query);
        let page: DevicePointPage = self
            .post(
                &session.target,
                endpoint::DEVICE_REAL_TIME_DATA,
                Some(&session.access_token),
                &body,
            )
            .await?;
        Ok(page.into_points())
    }
}
