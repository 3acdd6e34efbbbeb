//! Configuration module for PingWatch.
//!
//! Loads configuration from environment variables with sensible defaults and
//! validates it once at startup.

use std::collections::HashSet;
use std::env;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::probe::Endpoint;

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "Internet was down for {duration}, here's a {discount} discount.";

const DEFAULT_ENDPOINTS: &[([u8; 4], &str)] = &[
    ([1, 1, 1, 1], "Cloudflare Primary"),
    ([1, 0, 0, 1], "Cloudflare Secondary"),
    ([8, 8, 8, 8], "Google Primary"),
    ([8, 8, 4, 4], "Google Secondary"),
    ([200, 160, 2, 3], "NIC.br Primary"),
    ([200, 160, 0, 5], "NIC.br Secondary"),
];

/// Reachability probe policy.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Ordered endpoints; order is fallback priority.
    pub endpoints: Vec<Endpoint>,
    /// Per-attempt timeout (default: 3s)
    pub timeout: Duration,
    /// Attempts per endpoint (default: 1)
    pub attempts: u32,
    /// Tick period (default: 30s)
    pub interval: Duration,
    /// Router diagnostics RPC address, `None` when disabled
    pub router_grpc_addr: Option<String>,
}

/// Alert message settings.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub isp_bill_amount: f64,
    pub message_template: String,
    pub thread_id: Option<String>,
    pub decimal_separator: String,
    pub webhook_url: Option<String>,
    pub token: Option<String>,
}

/// Weather capture settings.
#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub refresh: Duration,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the dashboard (default: 4001)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pings.db")
    pub db_path: String,
    pub probe: ProbeSettings,
    /// Sampling gap that counts as a power outage (default: 120s)
    pub power_outage_gap: Duration,
    pub alert: AlertSettings,
    /// `None` when no coordinates are configured
    pub weather: Option<WeatherSettings>,
    /// Print the per-tick progress bar (default: true)
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 4001,
            db_path: "pings.db".to_string(),
            probe: ProbeSettings {
                endpoints: DEFAULT_ENDPOINTS
                    .iter()
                    .map(|(octets, label)| Endpoint::new(IpAddr::from(*octets), label))
                    .collect(),
                timeout: Duration::from_secs(3),
                attempts: 1,
                interval: Duration::from_secs(30),
                router_grpc_addr: Some("192.168.100.1:9200".to_string()),
            },
            power_outage_gap: Duration::from_secs(120),
            alert: AlertSettings {
                isp_bill_amount: 0.0,
                message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
                thread_id: None,
                decimal_separator: ",".to_string(),
                webhook_url: None,
                token: None,
            },
            weather: None,
            progress: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGWATCH_HTTP_PORT`: HTTP port (default: 4001)
    /// - `PINGWATCH_DB_PATH`: Database file path (default: "pings.db")
    /// - `PINGWATCH_ENDPOINTS`: `ip=Label` pairs, comma separated
    /// - `PINGWATCH_PROBE_TIMEOUT_SECS`, `PINGWATCH_PROBE_ATTEMPTS`,
    ///   `PINGWATCH_PROBE_INTERVAL_SECS`, `PINGWATCH_POWER_OUTAGE_GAP_SECS`
    /// - `PINGWATCH_ISP_BILL_AMOUNT`, `PINGWATCH_MESSAGE_TEMPLATE`,
    ///   `PINGWATCH_MESSAGE_THREAD_ID`, `PINGWATCH_DECIMAL_SEPARATOR`
    /// - `PINGWATCH_ALERT_WEBHOOK_URL`, `PINGWATCH_ALERT_TOKEN`
    /// - `PINGWATCH_ROUTER_GRPC_ADDR` (empty disables diagnostics)
    /// - `PINGWATCH_WEATHER_LATITUDE`, `PINGWATCH_WEATHER_LONGITUDE`,
    ///   `PINGWATCH_WEATHER_REFRESH_SECS`
    /// - `PINGWATCH_PROGRESS`
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Unset and blank are treated the same.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("PINGWATCH_HTTP_PORT") {
            cfg.http_port = parse_number("PINGWATCH_HTTP_PORT", &v)?;
        }
        if let Some(v) = get("PINGWATCH_DB_PATH") {
            cfg.db_path = v;
        }
        if let Some(v) = get("PINGWATCH_ENDPOINTS") {
            cfg.probe.endpoints = parse_endpoints(&v)?;
        }
        if let Some(v) = get("PINGWATCH_PROBE_TIMEOUT_SECS") {
            cfg.probe.timeout = parse_secs("PINGWATCH_PROBE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PINGWATCH_PROBE_ATTEMPTS") {
            cfg.probe.attempts = parse_number("PINGWATCH_PROBE_ATTEMPTS", &v)?;
            if cfg.probe.attempts == 0 {
                return Err(invalid("PINGWATCH_PROBE_ATTEMPTS", "must be at least 1"));
            }
        }
        if let Some(v) = get("PINGWATCH_PROBE_INTERVAL_SECS") {
            cfg.probe.interval = parse_secs("PINGWATCH_PROBE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("PINGWATCH_ROUTER_GRPC_ADDR") {
            let v = v.trim();
            cfg.probe.router_grpc_addr = (!v.is_empty()).then(|| v.to_string());
        }
        if let Some(v) = get("PINGWATCH_POWER_OUTAGE_GAP_SECS") {
            cfg.power_outage_gap = parse_secs("PINGWATCH_POWER_OUTAGE_GAP_SECS", &v)?;
        }

        if let Some(v) = get("PINGWATCH_ISP_BILL_AMOUNT") {
            let amount: f64 = parse_number("PINGWATCH_ISP_BILL_AMOUNT", &v)?;
            if !amount.is_finite() || amount < 0.0 {
                return Err(invalid("PINGWATCH_ISP_BILL_AMOUNT", "must be a non-negative amount"));
            }
            cfg.alert.isp_bill_amount = amount;
        }
        if let Some(v) = get("PINGWATCH_MESSAGE_TEMPLATE") {
            if !v.contains("{duration}") || !v.contains("{discount}") {
                return Err(invalid(
                    "PINGWATCH_MESSAGE_TEMPLATE",
                    "must contain {duration} and {discount}",
                ));
            }
            cfg.alert.message_template = v;
        }
        cfg.alert.thread_id = get("PINGWATCH_MESSAGE_THREAD_ID");
        if let Some(v) = lookup("PINGWATCH_DECIMAL_SEPARATOR") {
            if v.is_empty() {
                return Err(invalid("PINGWATCH_DECIMAL_SEPARATOR", "must not be empty"));
            }
            cfg.alert.decimal_separator = v;
        }
        cfg.alert.webhook_url = get("PINGWATCH_ALERT_WEBHOOK_URL");
        cfg.alert.token = get("PINGWATCH_ALERT_TOKEN");

        let latitude = get("PINGWATCH_WEATHER_LATITUDE")
            .map(|v| parse_number::<f64>("PINGWATCH_WEATHER_LATITUDE", &v))
            .transpose()?;
        let longitude = get("PINGWATCH_WEATHER_LONGITUDE")
            .map(|v| parse_number::<f64>("PINGWATCH_WEATHER_LONGITUDE", &v))
            .transpose()?;
        cfg.weather = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) {
                    return Err(invalid("PINGWATCH_WEATHER_LATITUDE", "must be within [-90, 90]"));
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    return Err(invalid("PINGWATCH_WEATHER_LONGITUDE", "must be within [-180, 180]"));
                }
                let refresh = match get("PINGWATCH_WEATHER_REFRESH_SECS") {
                    Some(v) => parse_secs("PINGWATCH_WEATHER_REFRESH_SECS", &v)?,
                    None => Duration::from_secs(600),
                };
                Some(WeatherSettings {
                    latitude,
                    longitude,
                    refresh,
                })
            }
            (None, None) => None,
            _ => {
                return Err(invalid(
                    "PINGWATCH_WEATHER_LATITUDE",
                    "latitude and longitude must be set together",
                ))
            }
        };

        if let Some(v) = get("PINGWATCH_PROGRESS") {
            cfg.progress = parse_bool("PINGWATCH_PROGRESS", &v)?;
        }

        Ok(cfg)
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(var, format!("cannot parse {:?}", value)))
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_number(var, value)?;
    if secs == 0 {
        return Err(invalid(var, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(var, format!("not a boolean: {:?}", other))),
    }
}

/// Parse `ip=Label,ip=Label` into an ordered endpoint list.
fn parse_endpoints(value: &str) -> Result<Vec<Endpoint>, ConfigError> {
    const VAR: &str = "PINGWATCH_ENDPOINTS";
    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (ip, label) = entry
            .split_once('=')
            .ok_or_else(|| invalid(VAR, format!("expected ip=Label, got {:?}", entry)))?;
        let address: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| invalid(VAR, format!("not an IP address: {:?}", ip)))?;
        let label = label.trim();
        if label.is_empty() {
            return Err(invalid(VAR, format!("missing label for {}", address)));
        }
        if !seen.insert(address) {
            return Err(invalid(VAR, format!("duplicate endpoint {}", address)));
        }
        endpoints.push(Endpoint::new(address, label));
    }

    if endpoints.is_empty() {
        return Err(invalid(VAR, "at least one endpoint is required"));
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.http_port, 4001);
        assert_eq!(cfg.db_path, "pings.db");
        assert_eq!(cfg.probe.timeout, Duration::from_secs(3));
        assert_eq!(cfg.probe.attempts, 1);
        assert_eq!(cfg.probe.interval, Duration::from_secs(30));
        assert_eq!(cfg.power_outage_gap, Duration::from_secs(120));
        assert_eq!(cfg.probe.endpoints.len(), 6);
        assert_eq!(cfg.probe.endpoints[0].label, "Cloudflare Primary");
        assert_eq!(cfg.alert.message_template, DEFAULT_MESSAGE_TEMPLATE);
        assert!(cfg.weather.is_none());
    }

    #[test]
    fn test_endpoint_order_preserved() {
        let cfg = load(&[("PINGWATCH_ENDPOINTS", "9.9.9.9=Quad9, 8.8.8.8=Google")]).unwrap();
        let addrs: Vec<String> = cfg.probe.endpoints.iter().map(|e| e.address.to_string()).collect();
        assert_eq!(addrs, vec!["9.9.9.9", "8.8.8.8"]);
        assert_eq!(cfg.probe.endpoints[0].label, "Quad9");
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        assert!(load(&[("PINGWATCH_ENDPOINTS", "dns.google=Google")]).is_err());
        assert!(load(&[("PINGWATCH_ENDPOINTS", "8.8.8.8")]).is_err());
        assert!(load(&[("PINGWATCH_ENDPOINTS", "8.8.8.8=A,8.8.8.8=B")]).is_err());
        assert!(load(&[("PINGWATCH_ENDPOINTS", " , ")]).is_err());
    }

    #[test]
    fn test_rejects_zero_durations() {
        assert!(load(&[("PINGWATCH_PROBE_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("PINGWATCH_PROBE_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("PINGWATCH_POWER_OUTAGE_GAP_SECS", "abc")]).is_err());
    }

    #[test]
    fn test_alert_settings() {
        let cfg = load(&[
            ("PINGWATCH_ISP_BILL_AMOUNT", "90.00"),
            ("PINGWATCH_MESSAGE_THREAD_ID", ""),
            ("PINGWATCH_DECIMAL_SEPARATOR", "."),
        ])
        .unwrap();
        assert_eq!(cfg.alert.isp_bill_amount, 90.0);
        assert_eq!(cfg.alert.thread_id, None);
        assert_eq!(cfg.alert.decimal_separator, ".");

        assert!(load(&[("PINGWATCH_ISP_BILL_AMOUNT", "-1")]).is_err());
        assert!(load(&[("PINGWATCH_MESSAGE_TEMPLATE", "down for {duration}")]).is_err());
    }

    #[test]
    fn test_weather_requires_both_coordinates() {
        assert!(load(&[("PINGWATCH_WEATHER_LATITUDE", "-23.5")]).is_err());
        assert!(load(&[
            ("PINGWATCH_WEATHER_LATITUDE", "95"),
            ("PINGWATCH_WEATHER_LONGITUDE", "0"),
        ])
        .is_err());

        let cfg = load(&[
            ("PINGWATCH_WEATHER_LATITUDE", "-23.5"),
            ("PINGWATCH_WEATHER_LONGITUDE", "-46.6"),
        ])
        .unwrap();
        let weather = cfg.weather.unwrap();
        assert_eq!(weather.latitude, -23.5);
        assert_eq!(weather.refresh, Duration::from_secs(600));
    }

    #[test]
    fn test_router_addr_can_be_disabled() {
        let cfg = load(&[("PINGWATCH_ROUTER_GRPC_ADDR", "")]).unwrap();
        assert!(cfg.probe.router_grpc_addr.is_none());
    }

    #[test]
    fn test_progress_flag() {
        assert!(!load(&[("PINGWATCH_PROGRESS", "off")]).unwrap().progress);
        assert!(load(&[("PINGWATCH_PROGRESS", "maybe")]).is_err());
    }
}
