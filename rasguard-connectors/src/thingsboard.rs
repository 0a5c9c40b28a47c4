//! ThingsBoard telemetry publisher
//!
//! Each sensor maps to a ThingsBoard device (identified by its access
//! token) and a telemetry key. One reading becomes one request:
//!
//! ```text
//! POST {base_url}/api/v1/{device_token}/telemetry
//! {"temperature": 24.31, "ts": 1700000000000}
//! ```
//!
//! The explicit `ts` makes the dashboard show the cycle start rather than the
//! arrival time, so a reading that needed retries still lands in the right
//! place on the chart.

use std::collections::HashMap;

use async_trait::async_trait;
use rasguard_core::cycle::FilteredReading;
use rasguard_core::errors::CollaboratorError;
use rasguard_core::sensor::SensorId;
use rasguard_core::traits::TelemetryPublisher;
use serde_json::{Map, Value};

use crate::http::HttpConnector;
use crate::ConnectionStats;

/// Where one sensor's readings go
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub token: String,
    pub key: String,
}

pub struct ThingsBoardPublisher {
    http: HttpConnector,
    devices: HashMap<SensorId, Device>,
}

impl ThingsBoardPublisher {
    pub fn new(http: HttpConnector) -> Self {
        Self {
            http,
            devices: HashMap::new(),
        }
    }

    /// Route `sensor` to the device with access token `token` under `key`
    pub fn device(mut self, sensor: impl Into<SensorId>, token: impl Into<String>, key: impl Into<String>) -> Self {
        self.devices.insert(
            sensor.into(),
            Device {
                token: token.into(),
                key: key.into(),
            },
        );
        self
    }

    pub fn devices(&self) -> usize {
        self.devices.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.http.stats()
    }
}

pub fn telemetry_path(token: &str) -> String {
    format!("/api/v1/{token}/telemetry")
}

/// `{key: value, "ts": timestamp}`
pub fn telemetry_payload(key: &str, reading: &FilteredReading) -> Value {
    let mut payload = Map::new();
    payload.insert(key.to_owned(), Value::from(reading.value));
    payload.insert("ts".to_owned(), Value::from(reading.timestamp));
    Value::Object(payload)
}

#[async_trait]
impl TelemetryPublisher for ThingsBoardPublisher {
    async fn publish(&mut self, reading: &FilteredReading) -> Result<(), CollaboratorError> {
        let device = self.devices.get(&reading.sensor).ok_or_else(|| {
            CollaboratorError::NotConfigured(format!("no ThingsBoard device for {}", reading.sensor))
        })?;

        let payload = telemetry_payload(&device.key, reading);
        self.http
            .post_json(&telemetry_path(&device.token), &payload)
            .await
            .map_err(CollaboratorError::from)
    }
}
