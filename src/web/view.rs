//! Presentation helpers for the dashboard.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::fmt;

use crate::db::Sample;
use crate::outage::{classify_failure, EventKind, OutageHistory};

/// Qualitative sky condition from cloud cover percentage.
pub fn sky_condition(cloud_cover: i64) -> &'static str {
    match cloud_cover {
        i64::MIN..=10 => "clear",
        11..=30 => "mostly clear",
        31..=60 => "partly cloudy",
        61..=80 => "mostly cloudy",
        _ => "overcast",
    }
}

/// Current weather as shown in the dashboard header.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSummary {
    pub temperature: i64,
    pub condition: &'static str,
}

impl fmt::Display for WeatherSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°C, {}", self.temperature, self.condition)
    }
}

/// Weather from the newest sample; absent without a temperature reading.
pub fn weather_summary(samples_desc: &[Sample]) -> Option<WeatherSummary> {
    let weather = &samples_desc.first()?.weather;
    let temperature = weather.temperature_celsius?.round() as i64;
    Some(WeatherSummary {
        temperature,
        condition: sky_condition(weather.cloud_cover_percentage.unwrap_or(0)),
    })
}

/// Relative time such as "5m ago"; "Never" when there is no event.
pub fn time_ago(time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(time) = time else {
        return "Never".to_string();
    };
    let seconds = (now - time).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

/// How a timeline cell is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    PowerOutage,
    FirmwareUpdate,
    ConnectivityLoss,
    Fast,
    Normal,
    Slow,
}

impl CellKind {
    pub fn color(self) -> &'static str {
        match self {
            CellKind::PowerOutage => "#000000",
            CellKind::FirmwareUpdate => "#ababab",
            CellKind::ConnectivityLoss => "#e70202",
            CellKind::Fast => "#196127",
            CellKind::Normal => "#239a3b",
            CellKind::Slow => "#f8c300",
        }
    }
}

/// Cell for `samples[index]`; a preceding sampling gap takes priority.
pub fn cell_kind(history: &OutageHistory<'_>, samples: &[Sample], index: usize) -> CellKind {
    if history.gap_before(index) {
        return CellKind::PowerOutage;
    }
    let sample = &samples[index];
    match classify_failure(sample) {
        Some(EventKind::FirmwareUpdate) => CellKind::FirmwareUpdate,
        Some(_) => CellKind::ConnectivityLoss,
        None => match sample.dns_latency().unwrap_or(0) {
            0..=40 => CellKind::Fast,
            41..=80 => CellKind::Normal,
            _ => CellKind::Slow,
        },
    }
}

/// Hover text for a timeline cell.
pub fn tooltip(sample: &Sample) -> String {
    let mut parts = Vec::new();
    match sample.dns_latency() {
        Some(latency) => parts.push(format!("{}ms", latency)),
        None => parts.push("No connection".to_string()),
    }

    let weather = &sample.weather;
    if let Some(t) = weather.temperature_celsius {
        parts.push(format!("{}°C", t.round() as i64));
    }
    if let Some(c) = weather.cloud_cover_percentage {
        parts.push(format!("{}% clouds", c));
    }
    if let Some(w) = weather.wind_speed_kmh {
        parts.push(format!("{} km/h wind", w.round() as i64));
    }

    let dns = sample
        .dns_ip()
        .map(|ip| format!(" • DNS: {}", ip))
        .unwrap_or_default();
    format!(
        "{}{}\n{}",
        sample.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        dns,
        parts.join(" • ")
    )
}

/// One hour of a day; `indices` point into the newest-first sample slice and
/// run oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HourGroup {
    pub hour: u32,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    pub date: NaiveDate,
    pub hours: Vec<HourGroup>,
}

/// Group newest-first samples by UTC day and hour, newest day and hour first.
pub fn group_by_day_and_hour(samples_desc: &[Sample]) -> Vec<DayGroup> {
    let mut days: Vec<DayGroup> = Vec::new();

    for (index, sample) in samples_desc.iter().enumerate() {
        let date = sample.timestamp.date_naive();
        let hour = sample.timestamp.hour();

        if days.last().map(|d| d.date) != Some(date) {
            days.push(DayGroup {
                date,
                hours: Vec::new(),
            });
        }
        let Some(day) = days.last_mut() else { continue };
        if day.hours.last().map(|h| h.hour) != Some(hour) {
            day.hours.push(HourGroup {
                hour,
                indices: Vec::new(),
            });
        }
        if let Some(group) = day.hours.last_mut() {
            group.indices.push(index);
        }
    }

    for group in days.iter_mut().flat_map(|d| d.hours.iter_mut()) {
        group.indices.reverse();
    }
    days
}

/// "Today", "Yesterday" or e.g. "May 01".
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%b %d").to_string()
    }
}

pub fn hour_label(hour: u32) -> String {
    format!("{:02}:00", hour)
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
    out
}
