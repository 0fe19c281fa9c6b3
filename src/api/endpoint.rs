pub type Endpoint = str;

pub const TOKEN: &Endpoint = "/openapi/apiManage/token";
pub const REFRESH_TOKEN: &Endpoint = "/openapi/apiManage/refreshToken";
pub const PLANT_LIST: &Endpoint = "/openapi/platform/queryPowerStationList";
pub const DEVICE_LIST: &Endpoint = "/openapi/platform/getDeviceListByPsId";
pub const DEVICE_REAL_TIME_DATA: &Endpoint = "/openapi/platform/getDeviceRealTimeData";
