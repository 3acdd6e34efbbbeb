//! Scheduler module: the fixed-interval probe loop.
//!
//! Each tick checks reachability, records the sample and advances the
//! downtime session. Ticks run strictly one after another.

mod progress;

pub use progress::*;

use crate::config::AlertSettings;
use crate::db::{Sample, Store};
use crate::notify::{render_message, Notifier, PostedRef};
use crate::outage::{DowntimeTracker, Transition};
use crate::probe::{Prober, WeatherFetcher};

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Result of an alert attempt made during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Posted { message: String, posted: PostedRef },
    Failed { message: String, error: String },
}

/// What happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub sample: Sample,
    pub recorded: bool,
    pub transition: Transition,
    pub alert: Option<AlertOutcome>,
}

/// Drives probing, recording and outage alerts.
pub struct Monitor {
    prober: Prober,
    weather: Arc<dyn WeatherFetcher>,
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    alert: AlertSettings,
    tracker: DowntimeTracker,
}

impl Monitor {
    pub fn new(
        prober: Prober,
        weather: Arc<dyn WeatherFetcher>,
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        alert: AlertSettings,
    ) -> Self {
        Self {
            prober,
            weather,
            store,
            notifier,
            alert,
            tracker: DowntimeTracker::new(),
        }
    }

    /// Run one probe tick.
    pub async fn tick(&mut self) -> TickReport {
        let (result, weather) = tokio::join!(self.prober.check(), self.weather.fetch_weather());
        if weather.is_empty() {
            tracing::debug!("No weather data for sample at {}", result.timestamp);
        }
        tracing::debug!(success = result.success(), "Probe finished at {}", result.timestamp);
        let sample = Sample::new(result.timestamp, result.outcome, weather);

        // A failed append is reported but does not stop the session logic.
        let recorded = match self.store.append(&sample) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to record sample at {}: {}", sample.timestamp, e);
                false
            }
        };

        let transition = self.tracker.observe(sample.success(), sample.timestamp);
        let alert = match transition {
            Transition::WentDown { started_at } => {
                tracing::warn!("Internet is down! (since {})", started_at);
                None
            }
            Transition::Recovered {
                started_at,
                downtime,
                ..
            } => {
                tracing::info!(
                    "Internet is back up after {} (down since {})",
                    downtime.formatted(),
                    started_at
                );
                Some(self.send_alert(render_message(&self.alert, downtime)).await)
            }
            Transition::StillUp | Transition::StillDown { .. } => None,
        };

        TickReport {
            sample,
            recorded,
            transition,
            alert,
        }
    }

    async fn send_alert(&self, message: String) -> AlertOutcome {
        match self.notifier.post(&message).await {
            Ok(posted) => {
                match &posted.url {
                    Some(url) => tracing::info!("Posted outage alert at {}", url),
                    None => tracing::info!("Posted outage alert: {}", message),
                }
                AlertOutcome::Posted { message, posted }
            }
            Err(e) => {
                // Not retried; the session is already closed.
                tracing::error!("Failed to post outage alert: {}", e);
                AlertOutcome::Failed {
                    message,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Tick every `interval` until the task is dropped.
    pub async fn run<W: Write>(mut self, interval: Duration, mut progress: Option<ProgressBar<W>>) {
        tracing::info!(
            "Probing {} endpoints every {:?}",
            self.prober.endpoints().len(),
            interval
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.tick().await;
            tracing::debug!(state = ?self.tracker.state(), recorded = report.recorded, "Tick complete");
            if let Some(bar) = progress.as_mut() {
                bar.record(report.sample.success());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notify::PostError;
    use crate::outage::Downtime;
    use crate::probe::testing::{endpoints, FakeDiagnostics, FakeReachability};
    use crate::probe::NoWeather;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn post(&self, message: &str) -> Result<PostedRef, PostError> {
            self.messages.lock().unwrap().push(message.to_string());
            if self.fail {
                return Err(PostError::Rejected {
                    status: 500,
                    body: "down".to_string(),
                });
            }
            Ok(PostedRef {
                id: Some("1".to_string()),
                url: None,
            })
        }
    }

    struct Harness {
        monitor: Monitor,
        reach: Arc<FakeReachability>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<Store>,
    }

    fn harness(fail_alerts: bool) -> Harness {
        let reach = Arc::new(FakeReachability::answering(&[("1.1.1.1", 15)]));
        let diag = Arc::new(FakeDiagnostics::with_state("rebooting"));
        let prober = Prober::new(
            endpoints(&["1.1.1.1", "8.8.8.8"]),
            Duration::from_secs(3),
            1,
            reach.clone(),
            diag,
        );
        let store = Arc::new(Store::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier {
            fail: fail_alerts,
            ..Default::default()
        });
        let mut alert = Config::default().alert;
        alert.isp_bill_amount = 90.0;

        let monitor = Monitor::new(prober, Arc::new(NoWeather), store.clone(), notifier.clone(), alert);
        Harness {
            monitor,
            reach,
            notifier,
            store,
        }
    }

    #[tokio::test]
    async fn test_healthy_tick_records_sample() {
        let mut h = harness(false);
        let report = h.monitor.tick().await;

        assert!(report.recorded);
        assert!(report.sample.success());
        assert_eq!(report.sample.dns_latency(), Some(15));
        assert_eq!(report.transition, Transition::StillUp);
        assert!(report.alert.is_none());
        assert_eq!(h.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outage_alerts_once_on_recovery() {
        let mut h = harness(false);
        h.reach.set(&[]);

        let first = h.monitor.tick().await;
        assert!(matches!(first.transition, Transition::WentDown { .. }));
        assert_eq!(first.sample.router_state(), Some("rebooting"));

        let second = h.monitor.tick().await;
        assert!(matches!(second.transition, Transition::StillDown { .. }));
        assert!(h.notifier.messages.lock().unwrap().is_empty());

        h.reach.set(&[("8.8.8.8", 40)]);
        let third = h.monitor.tick().await;
        match third.transition {
            Transition::Recovered { downtime, .. } => assert!(downtime.minutes <= 1),
            other => panic!("unexpected transition {:?}", other),
        }
        assert!(matches!(third.alert, Some(AlertOutcome::Posted { .. })));

        let fourth = h.monitor.tick().await;
        assert_eq!(fourth.transition, Transition::StillUp);

        let messages = h.notifier.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let expected = render_message(&h.monitor.alert, Downtime { minutes: 1 });
        let instant = render_message(&h.monitor.alert, Downtime { minutes: 0 });
        assert!(messages[0] == expected || messages[0] == instant);
        assert_eq!(h.store.count().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_alert_still_closes_session() {
        let mut h = harness(true);
        h.reach.set(&[]);
        h.monitor.tick().await;

        h.reach.set(&[("1.1.1.1", 10)]);
        let report = h.monitor.tick().await;
        assert!(matches!(report.alert, Some(AlertOutcome::Failed { .. })));
        assert!(!h.monitor.tracker.is_down());

        let next = h.monitor.tick().await;
        assert_eq!(next.transition, Transition::StillUp);
        assert_eq!(h.notifier.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_block_outage_tracking() {
        let mut h = harness(false);
        h.store.drop_pings_table();

        h.reach.set(&[]);
        let down = h.monitor.tick().await;
        assert!(!down.recorded);
        assert!(matches!(down.transition, Transition::WentDown { .. }));
        assert!(h.monitor.tracker.is_down());

        h.reach.set(&[("1.1.1.1", 12)]);
        let up = h.monitor.tick().await;
        assert!(!up.recorded);
        assert!(matches!(up.transition, Transition::Recovered { .. }));
        assert!(matches!(up.alert, Some(AlertOutcome::Posted { .. })));
        assert_eq!(h.notifier.messages.lock().unwrap().len(), 1);

        let next = h.monitor.tick().await;
        assert!(!next.recorded);
        assert_eq!(next.transition, Transition::StillUp);
    }

    #[tokio::test]
    async fn test_progress_bar_tracks_ticks() {
        let mut h = harness(false);
        let mut bar = ProgressBar::new(Vec::new(), 120);

        let report = h.monitor.tick().await;
        bar.record(report.sample.success());
        h.reach.set(&[]);
        let report = h.monitor.tick().await;
        bar.record(report.sample.success());

        assert_eq!(String::from_utf8(bar.into_inner()).unwrap(), "✓✗");
    }
}
