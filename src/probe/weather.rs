//! Ambient weather captured alongside each sample.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::db::WeatherAttributes;

/// Fetches current weather. Any failure yields all-absent attributes.
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch_weather(&self) -> WeatherAttributes;
}

/// Weather capture disabled.
#[derive(Debug, Default, Clone)]
pub struct NoWeather;

#[async_trait]
impl WeatherFetcher for NoWeather {
    async fn fetch_weather(&self) -> WeatherAttributes {
        WeatherAttributes::default()
    }
}

/// Current conditions from the Open-Meteo forecast API.
pub struct OpenMeteoWeather {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    precipitation: Option<f64>,
    wind_speed_10m: Option<f64>,
    cloud_cover: Option<f64>,
}

impl From<CurrentConditions> for WeatherAttributes {
    fn from(c: CurrentConditions) -> Self {
        Self {
            temperature_celsius: c.temperature_2m,
            humidity_percentage: c.relative_humidity_2m.map(|v| v.round() as i64),
            precipitation_mm: c.precipitation,
            wind_speed_kmh: c.wind_speed_10m,
            cloud_cover_percentage: c.cloud_cover.map(|v| v.round() as i64),
        }
    }
}

impl OpenMeteoWeather {
    const BASE_URL: &'static str = "https://api.open-meteo.com/v1/forecast";

    pub fn new(latitude: f64, longitude: f64, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let url = format!(
            "{}?latitude={}&longitude={}&current=temperature_2m,relative_humidity_2m,precipitation,wind_speed_10m,cloud_cover&wind_speed_unit=kmh",
            Self::BASE_URL,
            latitude,
            longitude
        );
        Ok(Self { client, url })
    }

    async fn request(&self) -> Result<WeatherAttributes, reqwest::Error> {
        let response: ForecastResponse = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.current.map(WeatherAttributes::from).unwrap_or_default())
    }
}

#[async_trait]
impl WeatherFetcher for OpenMeteoWeather {
    async fn fetch_weather(&self) -> WeatherAttributes {
        match self.request().await {
            Ok(weather) => weather,
            Err(e) => {
                tracing::debug!("Weather fetch failed: {}", e);
                WeatherAttributes::default()
            }
        }
    }
}

/// Reuses the last good reading until it is older than `refresh`.
///
/// A failed refresh keeps serving the last good reading.
pub struct CachedWeather {
    inner: Arc<dyn WeatherFetcher>,
    refresh: Duration,
    last: Mutex<Option<(Instant, WeatherAttributes)>>,
}

impl CachedWeather {
    pub fn new(inner: Arc<dyn WeatherFetcher>, refresh: Duration) -> Self {
        Self {
            inner,
            refresh,
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WeatherFetcher for CachedWeather {
    async fn fetch_weather(&self) -> WeatherAttributes {
        let mut last = self.last.lock().await;
        if let Some((at, weather)) = last.as_ref() {
            if at.elapsed() < self.refresh {
                return weather.clone();
            }
        }
        let weather = self.inner.fetch_weather().await;
        if weather.is_empty() {
            // Retried on the next tick.
            tracing::debug!("Weather refresh failed, keeping last good reading");
            return last.as_ref().map(|(_, good)| good.clone()).unwrap_or_default();
        }
        *last = Some((Instant::now(), weather.clone()));
        weather
    }
}
