//! Request and token payloads

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::PointId;

/// Body of `/openapi/apiManage/token`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenRequest {
    pub appkey: String,
    pub grant_type: &'static str,
    pub code: String,
    pub redirect_uri: String,
}

impl TokenRequest {
    pub fn authorization_code(appkey: &str, code: String, redirect_uri: String) -> Self {
        Self {
            appkey: appkey.to_string(),
            grant_type: "authorization_code",
            code,
            redirect_uri,
        }
    }
}

/// Body of `/openapi/apiManage/refreshToken`.
///
/// The documented request only has `refresh_token`. `appkey` is sent when
/// known and left out otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appkey: Option<String>,
}

/// `result_data` of both token endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on some refresh responses; the previous one stays in use.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(deserialize_with = "lenient_seconds")]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// `expires_in` as a JSON number or numeric string.
fn lenient_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(d)?;
    match &value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("invalid expires_in: {}", value)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantListRequest {
    pub appkey: String,
    pub page: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceListRequest {
    pub appkey: String,
    /// Sent as a string, as the gateway documents it.
    pub ps_id: String,
    pub page: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevicePointRequest {
    pub appkey: String,
    pub device_type: i64,
    pub ps_key_list: Vec<String>,
    pub point_id_list: Vec<String>,
    pub is_get_point_dict: &'static str,
}

/// Which telemetry points to read for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointQuery {
    pub device_type: i64,
    pub ps_key: String,
    pub point_ids: Vec<PointId>,
}

impl DevicePointRequest {
    pub fn new(appkey: &str, query: &PointQuery) -> Self {
        Self {
            appkey: appkey.to_string(),
            device_type: query.device_type,
            ps_key_list: vec![query.ps_key.clone()],
            point_id_list: query.point_ids.iter().map(|id| id.to_string()).collect(),
            is_get_point_dict: "1",
        }
    }
}
