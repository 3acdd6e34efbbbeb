//! Turns a sample history into outage events.
//!
//! Three kinds of event are recognised:
//! - a power outage, inferred from a gap between consecutive samples longer
//!   than the threshold, dated at the more recent sample of the pair;
//! - a firmware update, a failed sample whose router state mentions an update
//!   or reboot;
//! - a connectivity loss, any other failed sample.
//!
//! A gap and a failure on the same sample are independent events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::db::Sample;

const FIRMWARE_MARKERS: &[&str] = &["software_update", "updating", "reboot"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ConnectivityLoss,
    PowerOutage,
    FirmwareUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassifiedEvent {
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

/// Whether a router diagnostic payload indicates a firmware update.
///
/// Structured payloads are normalised through JSON; anything unparseable is
/// matched as raw text. An empty payload never matches.
pub fn is_firmware_update(router_state: &str) -> bool {
    if router_state.trim().is_empty() {
        return false;
    }
    let text = match serde_json::from_str::<serde_json::Value>(router_state) {
        Ok(value) => value.to_string(),
        Err(_) => router_state.to_string(),
    }
    .to_lowercase();
    FIRMWARE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Failure classification of a single sample; `None` when it succeeded.
pub fn classify_failure(sample: &Sample) -> Option<EventKind> {
    let router_state = sample.router_state()?;
    if is_firmware_update(router_state) {
        Some(EventKind::FirmwareUpdate)
    } else {
        Some(EventKind::ConnectivityLoss)
    }
}

/// Most recent instant of each event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutageSummary {
    pub last_power_outage: Option<DateTime<Utc>>,
    pub last_connectivity_loss: Option<DateTime<Utc>>,
    pub last_firmware_update: Option<DateTime<Utc>>,
}

/// Read-only view over samples ordered newest first.
#[derive(Debug, Clone, Copy)]
pub struct OutageHistory<'a> {
    samples: &'a [Sample],
    gap_threshold: Duration,
}

impl<'a> OutageHistory<'a> {
    /// `samples` must be ordered newest first.
    pub fn new(samples: &'a [Sample], gap_threshold: Duration) -> Self {
        Self {
            samples,
            gap_threshold,
        }
    }

    /// Whether the gap between `samples[index]` and the next older sample
    /// exceeds the threshold.
    pub fn gap_before(&self, index: usize) -> bool {
        match (self.samples.get(index), self.samples.get(index + 1)) {
            (Some(current), Some(older)) => {
                let gap_ms = (current.timestamp - older.timestamp).num_milliseconds().unsigned_abs();
                u128::from(gap_ms) > self.gap_threshold.as_millis()
            }
            _ => false,
        }
    }

    /// All events, most recent first, in one pass over the samples.
    pub fn events(&self) -> impl Iterator<Item = ClassifiedEvent> + 'a {
        let history = *self;
        self.samples.iter().enumerate().flat_map(move |(i, sample)| {
            let gap = history.gap_before(i).then_some(ClassifiedEvent {
                kind: EventKind::PowerOutage,
                at: sample.timestamp,
            });
            let failure = classify_failure(sample).map(|kind| ClassifiedEvent {
                kind,
                at: sample.timestamp,
            });
            gap.into_iter().chain(failure)
        })
    }

    fn most_recent(&self, kind: EventKind) -> Option<DateTime<Utc>> {
        self.events().find(|e| e.kind == kind).map(|e| e.at)
    }

    pub fn most_recent_power_outage(&self) -> Option<DateTime<Utc>> {
        self.most_recent(EventKind::PowerOutage)
    }

    pub fn most_recent_connectivity_loss(&self) -> Option<DateTime<Utc>> {
        self.most_recent(EventKind::ConnectivityLoss)
    }

    pub fn most_recent_firmware_update(&self) -> Option<DateTime<Utc>> {
        self.most_recent(EventKind::FirmwareUpdate)
    }

    /// All three "most recent" answers from a single scan.
    pub fn summary(&self) -> OutageSummary {
        let mut summary = OutageSummary::default();
        for event in self.events() {
            let slot = match event.kind {
                EventKind::PowerOutage => &mut summary.last_power_outage,
                EventKind::ConnectivityLoss => &mut summary.last_connectivity_loss,
                EventKind::FirmwareUpdate => &mut summary.last_firmware_update,
            };
            slot.get_or_insert(event.at);

            if summary.last_power_outage.is_some()
                && summary.last_connectivity_loss.is_some()
                && summary.last_firmware_update.is_some()
            {
                break;
            }
        }
        summary
    }
}
