//! Downtime session state machine.

use chrono::{DateTime, Utc};

/// Length of a resolved outage, rounded up to whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downtime {
    pub minutes: u64,
}

impl Downtime {
    pub fn between(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        let ms = u64::try_from((ended_at - started_at).num_milliseconds()).unwrap_or(0);
        Self {
            minutes: ms.div_ceil(60_000),
        }
    }

    /// `"{h}h {m}m"` from an hour upwards, otherwise `"{m}m"`.
    pub fn formatted(&self) -> String {
        if self.minutes >= 60 {
            format!("{}h {}m", self.minutes / 60, self.minutes % 60)
        } else {
            format!("{}m", self.minutes)
        }
    }

    /// Pro-rated share of a monthly bill (30 day month), rounded up to cents.
    pub fn discount(&self, monthly_bill: f64) -> f64 {
        let minute_cost = monthly_bill / 30.0 / 24.0 / 60.0;
        ceil_cents(minute_cost * self.minutes as f64)
    }
}

fn ceil_cents(amount: f64) -> f64 {
    let cents = amount * 100.0;
    // 0.07 * 100 is 7.000000000000001; don't bump that to 8
    let nearest = cents.round();
    if (cents - nearest).abs() < 1e-6 {
        nearest / 100.0
    } else {
        cents.ceil() / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Up,
    Down { started_at: DateTime<Utc> },
}

/// What a single observation did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StillUp,
    WentDown {
        started_at: DateTime<Utc>,
    },
    StillDown {
        started_at: DateTime<Utc>,
    },
    /// The only transition that should raise an alert.
    Recovered {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        downtime: Downtime,
    },
}

/// Tracks at most one ongoing outage in memory.
#[derive(Debug, Clone)]
pub struct DowntimeTracker {
    state: SessionState,
}

impl Default for DowntimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DowntimeTracker {
    pub fn new() -> Self {
        Self {
            state: SessionState::Up,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_down(&self) -> bool {
        matches!(self.state, SessionState::Down { .. })
    }

    /// Feed one probe outcome observed at `now`.
    pub fn observe(&mut self, success: bool, now: DateTime<Utc>) -> Transition {
        match (self.state, success) {
            (SessionState::Up, true) => Transition::StillUp,
            (SessionState::Up, false) => {
                self.state = SessionState::Down { started_at: now };
                Transition::WentDown { started_at: now }
            }
            (SessionState::Down { started_at }, false) => Transition::StillDown { started_at },
            (SessionState::Down { started_at }, true) => {
                self.state = SessionState::Up;
                Transition::Recovered {
                    started_at,
                    ended_at: now,
                    downtime: Downtime::between(started_at, now),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_starts_up() {
        let tracker = DowntimeTracker::new();
        assert_eq!(tracker.state(), SessionState::Up);
        assert!(!tracker.is_down());
    }

    #[test]
    fn test_outage_resolves_once() {
        let mut tracker = DowntimeTracker::new();
        let t0 = t0();
        let observations = [
            (false, t0),
            (false, t0 + Duration::seconds(30)),
            (false, t0 + Duration::seconds(60)),
            (true, t0 + Duration::seconds(95)),
        ];

        let transitions: Vec<_> = observations
            .iter()
            .map(|(ok, now)| tracker.observe(*ok, *now))
            .collect();

        assert_eq!(transitions[0], Transition::WentDown { started_at: t0 });
        assert_eq!(transitions[1], Transition::StillDown { started_at: t0 });
        assert_eq!(transitions[2], Transition::StillDown { started_at: t0 });

        let recoveries: Vec<_> = transitions
            .iter()
            .filter_map(|t| match t {
                Transition::Recovered { downtime, .. } => Some(*downtime),
                _ => None,
            })
            .collect();
        assert_eq!(recoveries, vec![Downtime { minutes: 2 }]);
        assert_eq!(tracker.state(), SessionState::Up);
    }

    #[test]
    fn test_up_stays_up() {
        let mut tracker = DowntimeTracker::new();
        assert_eq!(tracker.observe(true, t0()), Transition::StillUp);
        assert_eq!(tracker.observe(true, t0() + Duration::seconds(30)), Transition::StillUp);
    }

    #[test]
    fn test_second_outage_starts_fresh() {
        let mut tracker = DowntimeTracker::new();
        let t0 = t0();
        tracker.observe(false, t0);
        tracker.observe(true, t0 + Duration::seconds(30));

        let later = t0 + Duration::hours(1);
        assert_eq!(tracker.observe(false, later), Transition::WentDown { started_at: later });
        match tracker.observe(true, later + Duration::minutes(61)) {
            Transition::Recovered { downtime, .. } => assert_eq!(downtime.minutes, 61),
            other => panic!("unexpected transition {:?}", other),
        }
    }

    #[test]
    fn test_downtime_rounds_up() {
        let t0 = t0();
        assert_eq!(Downtime::between(t0, t0).minutes, 0);
        assert_eq!(Downtime::between(t0, t0 + Duration::seconds(1)).minutes, 1);
        assert_eq!(Downtime::between(t0, t0 + Duration::seconds(60)).minutes, 1);
        assert_eq!(Downtime::between(t0, t0 + Duration::seconds(95)).minutes, 2);
        // Clock stepped backwards
        assert_eq!(Downtime::between(t0, t0 - Duration::seconds(30)).minutes, 0);
    }

    #[test]
    fn test_formatted_duration() {
        assert_eq!(Downtime { minutes: 0 }.formatted(), "0m");
        assert_eq!(Downtime { minutes: 59 }.formatted(), "59m");
        assert_eq!(Downtime { minutes: 60 }.formatted(), "1h 0m");
        assert_eq!(Downtime { minutes: 125 }.formatted(), "2h 5m");
    }

    #[test]
    fn test_discount() {
        // 90 / 30 / 24 / 60 per minute
        assert_eq!(Downtime { minutes: 60 }.discount(90.0), 0.13);
        assert_eq!(Downtime { minutes: 3600 }.discount(90.0), 7.5);
        assert_eq!(Downtime { minutes: 2 }.discount(90.0), 0.01);
        assert_eq!(Downtime { minutes: 0 }.discount(90.0), 0.0);
        assert_eq!(Downtime { minutes: 1440 }.discount(300.0), 10.0);
    }

    #[test]
    fn test_ceil_cents_ignores_float_noise() {
        assert_eq!(ceil_cents(0.07), 0.07);
        assert_eq!(ceil_cents(0.071), 0.08);
        assert_eq!(ceil_cents(7.5), 7.5);
    }
}
