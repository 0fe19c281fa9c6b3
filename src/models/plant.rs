//! Power-station (plant) models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Power station record as returned by `queryPowerStationList`.
///
/// Fields the client does not know about are kept in `extra` so a cached
/// plant list round-trips verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plant {
    pub ps_id: u64,
    pub ps_name: String,
    pub description: Option<String>,
    pub ps_type: i64,
    /// 1: deployed, 0: undeployed
    pub online_status: i64,
    /// 1: normal, 2: disabled, 3: connected
    pub valid_flag: i64,
    pub grid_connection_status: i64,
    pub install_date: Option<String>,
    pub ps_location: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    /// 1: fault, 2: alarm, 3: normal
    pub ps_fault_status: i64,
    pub connect_type: i64,
    pub update_time: Option<String>,
    pub ps_current_time_zone: Option<String>,
    pub grid_connection_time: Option<String>,
    pub build_status: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Plant {
    pub fn type_label(&self) -> &'static str {
        match self.ps_type {
            1 => "Utility Plant",
            3 => "Distributed PV",
            4 => "Residential PV",
            5 => "Residential Storage",
            6 => "Village Plant",
            7 => "Dist. Storage",
            8 => "Poverty Alleviation",
            9 => "Wind Power",
            12 => "C&I Storage",
            _ => "Unknown",
        }
    }

    pub fn fault_label(&self) -> &'static str {
        match self.ps_fault_status {
            1 => "Fault",
            2 => "Alarm",
            3 => "Normal",
            _ => "Unknown",
        }
    }

    pub fn is_online(&self) -> bool {
        self.online_status == 1
    }

    /// Install date without the time-of-day part.
    pub fn install_day(&self) -> &str {
        self.install_date
            .as_deref()
            .and_then(|d| d.split(' ').next())
            .filter(|d| !d.is_empty())
            .unwrap_or("-")
    }
}

/// `result_data` of `queryPowerStationList`.
#[derive(Debug, Deserialize)]
pub struct PlantPage {
    #[serde(rename = "pageList", default)]
    pub page_list: Vec<Plant>,
    /// The gateway documents this as a string.
    pub row_count: Option<Value>,
}
