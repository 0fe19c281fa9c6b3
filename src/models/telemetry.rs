//! Real-time device telemetry
//!
//! `getDeviceRealTimeData` returns one row per device. Besides a handful of
//! identifying fields, each row carries one key per requested point id,
//! named `p<id>` (point 58604 arrives as `p58604`). Those keys are lifted
//! into an explicit `point id -> value` map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type PointId = u32;

/// Battery state of charge, delivered as a fraction (0.0 - 1.0).
pub const BATTERY_SOC_POINT: PointId = 58604;

/// A single telemetry value.
///
/// The gateway sends numbers as JSON strings more often than not, so the
/// raw value is kept and interpreted on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointValue(pub Value);

impl PointValue {
    pub fn as_f64(&self) -> Option<f64> {
        let value = match &self.0 {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}

/// Field name used on the wire for `id`.
pub fn point_field(id: PointId) -> String {
    format!("p{}", id)
}

/// Inverse of [`point_field`]; `None` for anything that is not `p<digits>`.
pub fn parse_point_field(key: &str) -> Option<PointId> {
    let digits = key.strip_prefix('p')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One telemetry row for a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDevicePoint", into = "RawDevicePoint")]
pub struct DevicePoint {
    pub ps_key: String,
    pub device_sn: Option<String>,
    pub device_time: Option<String>,
    /// Non-null `p<id>` fields.
    pub points: BTreeMap<PointId, PointValue>,
    /// Every other field (uuid, device_name, dev_status, ...), untouched.
    pub extra: Map<String, Value>,
}

impl DevicePoint {
    pub fn point(&self, id: PointId) -> Option<&PointValue> {
        self.points.get(&id)
    }

    pub fn battery_soc(&self) -> Option<f64> {
        self.point(BATTERY_SOC_POINT).and_then(PointValue::as_f64)
    }
}

#[derive(Serialize, Deserialize)]
struct RawDevicePoint {
    #[serde(default)]
    ps_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_sn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_time: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<RawDevicePoint> for DevicePoint {
    fn from(raw: RawDevicePoint) -> Self {
        let mut points = BTreeMap::new();
        let mut extra = Map::new();
        for (key, value) in raw.rest {
            match parse_point_field(&key) {
                Some(id) => {
                    if !value.is_null() {
                        points.insert(id, PointValue(value));
                    }
                }
                None => {
                    extra.insert(key, value);
                }
            }
        }
        DevicePoint {
            ps_key: raw.ps_key,
            device_sn: raw.device_sn,
            device_time: raw.device_time,
            points,
            extra,
        }
    }
}

impl From<DevicePoint> for RawDevicePoint {
    fn from(point: DevicePoint) -> Self {
        let mut rest = point.extra;
        for (id, value) in point.points {
            rest.insert(point_field(id), value.0);
        }
        RawDevicePoint {
            ps_key: point.ps_key,
            device_sn: point.device_sn,
            device_time: point.device_time,
            rest,
        }
    }
}

/// `result_data` of `getDeviceRealTimeData`.
#[derive(Debug, Deserialize)]
pub struct DevicePointPage {
    #[serde(default)]
    pub device_point_list: Vec<DevicePointEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DevicePointEntry {
    pub device_point: DevicePoint,
}

impl DevicePointPage {
    pub fn into_points(self) -> Vec<DevicePoint> {
        self.device_point_list
            .into_iter()
            .map(|entry| entry.device_point)
            .collect()
    }
}
