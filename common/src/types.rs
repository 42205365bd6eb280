use serde::{Deserialize, Serialize};

use crate::{
    schedule::ClockTime,
    settings::{ConfigStore, NvMedium},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityMode {
    /// Joined to the configured WiFi network.
    Station,
    /// Serving our own access point for setup.
    AccessPoint,
}

impl ConnectivityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "STATION",
            Self::AccessPoint => "ACCESS_POINT",
        }
    }
}

/// Transient state rebuilt on every boot.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub device_id: String,
    pub mode: ConnectivityMode,
}

impl RuntimeState {
    pub fn new(device_id: String, mode: ConnectivityMode) -> Self {
        Self { device_id, mode }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LightStatus {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub mode: &'static str,
    #[serde(rename = "lightsOn")]
    pub lights_on: bool,
    #[serde(rename = "timerOn")]
    pub timer_on: bool,
    #[serde(rename = "onAt")]
    pub on_at: String,
    #[serde(rename = "offAt")]
    pub off_at: String,
    #[serde(rename = "tzOffset")]
    pub tz_offset: i32,
    pub dst: bool,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    #[serde(rename = "localTime")]
    pub local_time: Option<String>,
    #[serde(rename = "factoryDefault")]
    pub factory_default: bool,
}

impl LightStatus {
    pub fn capture<M: NvMedium>(
        store: &ConfigStore<M>,
        runtime: &RuntimeState,
        local_time: Option<ClockTime>,
    ) -> Self {
        Self {
            device_id: runtime.device_id.clone(),
            mode: runtime.mode.as_str(),
            lights_on: store.is_lights_on(),
            timer_on: store.is_timer_on(),
            on_at: store.on_time().to_string(),
            off_at: store.off_time().to_string(),
            tz_offset: store.tz_offset(),
            dst: store.is_dst(),
            time_synced: local_time.is_some(),
            local_time: local_time.map(|time| time.to_string()),
            factory_default: store.is_factory_default(),
        }
    }
}
