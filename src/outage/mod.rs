//! Outage analysis: event classification over stored samples and the
//! in-memory downtime session used for alerting.

mod classifier;
mod tracker;

pub use classifier::*;
pub use tracker::*;
