//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Result of one reachability observation.
///
/// Either an endpoint answered (address + latency) or none did and the
/// router's diagnostic state was captured instead. Never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reachable {
        dns_ip: IpAddr,
        /// Round-trip latency in whole milliseconds
        dns_latency: u32,
    },
    Unreachable {
        /// Opaque router diagnostics, possibly empty
        router_state: String,
    },
}

/// Ambient weather captured alongside a sample. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherAttributes {
    pub temperature_celsius: Option<f64>,
    pub humidity_percentage: Option<i64>,
    pub precipitation_mm: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub cloud_cover_percentage: Option<i64>,
}

impl WeatherAttributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single stored reachability sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub weather: WeatherAttributes,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, outcome: Outcome, weather: WeatherAttributes) -> Self {
        Self {
            timestamp,
            outcome,
            weather,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Reachable { .. })
    }

    pub fn dns_ip(&self) -> Option<IpAddr> {
        match &self.outcome {
            Outcome::Reachable { dns_ip, .. } => Some(*dns_ip),
            Outcome::Unreachable { .. } => None,
        }
    }

    pub fn dns_latency(&self) -> Option<u32> {
        match &self.outcome {
            Outcome::Reachable { dns_latency, .. } => Some(*dns_latency),
            Outcome::Unreachable { .. } => None,
        }
    }

    pub fn router_state(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Reachable { .. } => None,
            Outcome::Unreachable { router_state } => Some(router_state),
        }
    }
}

/// Flat sample representation for the JSON API.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_latency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_state: Option<String>,
    pub weather: WeatherAttributes,
}

impl From<&Sample> for SampleRecord {
    fn from(sample: &Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            success: sample.success(),
            dns_ip: sample.dns_ip().map(|ip| ip.to_string()),
            dns_latency: sample.dns_latency(),
            router_state: sample.router_state().map(str::to_string),
            weather: sample.weather.clone(),
        }
    }
}
