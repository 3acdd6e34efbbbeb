//! HTTP request handlers.

use super::view::*;
use super::AppState;
use crate::db::{Sample, SampleRecord};
use crate::outage::{OutageHistory, OutageSummary};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;

// ============================================================================
// Templates (simple string replacement)
// ============================================================================

const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.samples_desc() {
        Ok(samples) => {
            Html(render_dashboard(&samples, state.config.power_outage_gap, Utc::now())).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Render the full dashboard page for newest-first samples.
pub fn render_dashboard(samples: &[Sample], gap_threshold: Duration, now: DateTime<Utc>) -> String {
    let history = OutageHistory::new(samples, gap_threshold);
    let summary = history.summary();

    let (status_class, status_text) = match samples.first() {
        Some(s) if s.success() => ("up", "Online"),
        Some(_) => ("down", "Offline"),
        None => ("unknown", "No data"),
    };
    let weather = weather_summary(samples)
        .map(|w| w.to_string())
        .unwrap_or_else(|| "Unavailable".to_string());

    let content = DASHBOARD_TEMPLATE
        .replace("{{status_class}}", status_class)
        .replace("{{status_text}}", status_text)
        .replace("{{last_power_outage}}", &time_ago(summary.last_power_outage, now))
        .replace("{{last_connectivity_loss}}", &time_ago(summary.last_connectivity_loss, now))
        .replace("{{last_firmware_update}}", &time_ago(summary.last_firmware_update, now))
        .replace("{{weather}}", &escape_html(&weather))
        .replace("{{sample_count}}", &samples.len().to_string())
        .replace("{{timeline}}", &render_timeline(samples, &history, now));

    LAYOUT_TEMPLATE
        .replace("{{title}}", "PingWatch")
        .replace("{{content}}", &content)
}

fn render_timeline(samples: &[Sample], history: &OutageHistory<'_>, now: DateTime<Utc>) -> String {
    let today = now.date_naive();
    let mut html = String::new();

    for day in group_by_day_and_hour(samples) {
        let _ = write!(
            html,
            "<section class=\"day\"><h2>{}</h2>",
            day_label(day.date, today)
        );
        for hour in &day.hours {
            let _ = write!(
                html,
                "<div class=\"hour\"><span class=\"hour-label\">{}</span><div class=\"cells\">",
                hour_label(hour.hour)
            );
            for &index in &hour.indices {
                let kind = cell_kind(history, samples, index);
                let _ = write!(
                    html,
                    "<span class=\"cell\" style=\"background:{}\" title=\"{}\"></span>",
                    kind.color(),
                    escape_html(&tooltip(&samples[index]))
                );
            }
            html.push_str("</div></div>");
        }
        html.push_str("</section>\n");
    }

    if html.is_empty() {
        html.push_str("<p class=\"empty\">No samples recorded yet.</p>");
    }
    html
}

// ============================================================================
// API
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SamplesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn handle_get_samples(
    State(state): State<AppState>,
    Query(query): Query<SamplesQuery>,
) -> impl IntoResponse {
    match state.store.samples_desc() {
        Ok(samples) => {
            let limit = query.limit.unwrap_or(samples.len());
            let records: Vec<SampleRecord> = samples.iter().take(limit).map(SampleRecord::from).collect();
            Json(records).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// `None` before the first sample
    pub online: Option<bool>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub sample_count: usize,
    #[serde(flatten)]
    pub outages: OutageSummary,
    pub weather: Option<String>,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.samples_desc() {
        Ok(samples) => {
            let history = OutageHistory::new(&samples, state.config.power_outage_gap);
            Json(StatusResponse {
                online: samples.first().map(Sample::success),
                last_sample_at: samples.first().map(|s| s.timestamp),
                sample_count: samples.len(),
                outages: history.summary(),
                weather: weather_summary(&samples).map(|w| w.to_string()),
            })
            .into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_static(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(asset) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                asset.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#196127"/>
        <path d="M20 55 L40 55 L50 30 L60 70 L70 50 L80 50" stroke="white" stroke-width="6" fill="none"/>
    </svg>"##;

    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{Outcome, Store, WeatherAttributes};
    use crate::web::router;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn up(secs: i64) -> Sample {
        Sample::new(
            at(secs),
            Outcome::Reachable {
                dns_ip: "8.8.8.8".parse().unwrap(),
                dns_latency: 30,
            },
            WeatherAttributes {
                temperature_celsius: Some(24.2),
                cloud_cover_percentage: Some(5),
                ..Default::default()
            },
        )
    }

    fn down(secs: i64, state: &str) -> Sample {
        Sample::new(
            at(secs),
            Outcome::Unreachable {
                router_state: state.to_string(),
            },
            WeatherAttributes::default(),
        )
    }

    #[test]
    fn test_render_empty_dashboard() {
        let page = render_dashboard(&[], Duration::from_secs(120), at(0));
        assert!(page.contains("No data"));
        assert!(page.contains("No samples recorded yet."));
        assert!(page.contains("Unavailable"));
        assert!(!page.contains("{{"));
    }

    #[test]
    fn test_render_dashboard_with_events() {
        let samples = vec![up(600), down(570, "reboot"), up(540), up(0)];
        let page = render_dashboard(&samples, Duration::from_secs(120), at(660));

        assert!(page.contains("Online"));
        assert!(page.contains("24°C, clear"));
        assert!(page.contains("background:#000000"));
        assert!(page.contains("background:#ababab"));
        assert!(page.contains("background:#196127"));
        assert!(page.contains("just now") || page.contains("1m ago"));
        assert_eq!(page.matches("class=\"cell\"").count(), 4);
        assert!(!page.contains("{{"));
    }

    async fn spawn_app(samples: &[Sample]) -> String {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for sample in samples {
            store.append(sample).unwrap();
        }
        let state = AppState {
            config: Arc::new(Config::default()),
            store,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let base = spawn_app(&[up(0), up(30), down(300, ""), up(330)]).await;
        let status: serde_json::Value = reqwest::get(format!("{}/api/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(status["online"], true);
        assert_eq!(status["sample_count"], 4);
        assert_eq!(status["last_power_outage"], serde_json::json!(at(300)));
        assert_eq!(status["last_connectivity_loss"], serde_json::json!(at(300)));
        assert!(status["last_firmware_update"].is_null());
        assert_eq!(status["weather"], "24°C, clear");
    }

    #[tokio::test]
    async fn test_status_endpoint_empty_store() {
        let base = spawn_app(&[]).await;
        let status: serde_json::Value = reqwest::get(format!("{}/api/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert!(status["online"].is_null());
        assert!(status["last_power_outage"].is_null());
        assert!(status["weather"].is_null());
    }

    #[tokio::test]
    async fn test_samples_endpoint_newest_first() {
        let base = spawn_app(&[up(0), down(30, "x"), up(60)]).await;
        let samples: Vec<serde_json::Value> = reqwest::get(format!("{}/api/samples?limit=2", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0]["success"], true);
        assert_eq!(samples[0]["dns_ip"], "8.8.8.8");
        assert_eq!(samples[1]["success"], false);
        assert_eq!(samples[1]["router_state"], "x");
    }

    #[tokio::test]
    async fn test_static_assets() {
        let base = spawn_app(&[]).await;
        let css = reqwest::get(format!("{}/static/style.css", base)).await.unwrap();
        assert_eq!(css.status(), 200);
        assert_eq!(css.headers()["content-type"], "text/css");

        let missing = reqwest::get(format!("{}/static/nope.js", base)).await.unwrap();
        assert_eq!(missing.status(), 404);
    }
}
