//! Plant device models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device type code of a battery.
pub const BATTERY_DEVICE_TYPE: i64 = 43;

/// Device record as returned by `getDeviceListByPsId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantDevice {
    pub uuid: Option<u64>,
    pub ps_key: String,
    pub device_sn: Option<String>,
    pub device_name: String,
    pub device_type: i64,
    pub type_name: Option<String>,
    pub device_model_id: Option<i64>,
    pub device_model_code: Option<String>,
    /// 1: fault, 4: normal, anything else: alarm
    pub dev_fault_status: i64,
    pub dev_status: Option<Value>,
    pub device_code: Option<i64>,
    pub chnnl_id: Option<i64>,
    pub communication_dev_sn: Option<String>,
    pub factory_name: Option<String>,
    pub firmware_version_info: Option<FirmwareVersionInfo>,
    pub grid_connection_date: Option<String>,
    pub ps_id: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlantDevice {
    pub fn is_battery(&self) -> bool {
        self.device_type == BATTERY_DEVICE_TYPE
    }

    pub fn fault_label(&self) -> &'static str {
        match self.dev_fault_status {
            4 => "Normal",
            1 => "Fault",
            _ => "Alarm",
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.device_type {
            1 => "Inverter",
            3 => "Grid-Connection Point",
            4 => "Combiner Box",
            5 => "Meteo Station",
            7 => "Meter",
            9 => "Data Logger",
            11 => "Plant",
            14 => "Energy Storage System",
            17 => "Unit",
            41 => "Optimizer",
            43 => "Battery",
            51 => "Charger",
            55 => "Microinverter",
            _ => "Device",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareVersionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bat_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcd_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mdsp_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdsp_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvd_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpld_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_version: Option<String>,
}

/// `result_data` of `getDeviceListByPsId`.
#[derive(Debug, Deserialize)]
pub struct DevicePage {
    #[serde(rename = "pageList", default)]
    pub page_list: Vec<PlantDevice>,
}

/// First battery in `devices`, if any.
pub fn find_battery(devices: &[PlantDevice]) -> Option<&PlantDevice> {
    devices.iter().find(|d| d.is_battery())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(device_type: i64, ps_key: &str) -> PlantDevice {
        PlantDevice {
            device_type,
            ps_key: ps_key.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_battery_picks_first_match() {
        let devices = vec![device(1, "a"), device(43, "b"), device(43, "c")];
        assert_eq!(find_battery(&devices).map(|d| d.ps_key.as_str()), Some("b"));
        assert!(find_battery(&devices[..1]).is_none());
    }

    #[test]
    fn test_device_page_parse() {
        let raw = r#"{"pageList":[
            {"uuid":7,"ps_key":"1234_43_1_1","device_sn":"B1","device_name":"Battery",
             "device_type":43,"type_name":"Battery","dev_fault_status":4,
             "firmware_version_info":{"bat_version":"1.2"},"ps_id":1234}
        ]}"#;
        let page: DevicePage = serde_json::from_str(raw).unwrap();
        let battery = &page.page_list[0];
        assert!(battery.is_battery());
        assert_eq!(battery.fault_label(), "Normal");
        assert_eq!(
            battery
                .firmware_version_info
                .as_ref()
                .and_then(|f| f.bat_version.as_deref()),
            Some("1.2")
        );
    }
}
