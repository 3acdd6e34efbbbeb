//! Outage alerts.
//!
//! An alert is posted exactly once per resolved outage, with the downtime and
//! the bill discount it is worth.

mod webhook;

pub use webhook::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AlertSettings;
use crate::outage::Downtime;

/// Alert post error types.
#[derive(Error, Debug)]
pub enum PostError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("alert rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Reference to a published alert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostedRef {
    pub id: Option<String>,
    pub url: Option<String>,
}

/// Publishes alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, message: &str) -> Result<PostedRef, PostError>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn post(&self, message: &str) -> Result<PostedRef, PostError> {
        tracing::info!("Alert: {}", message);
        Ok(PostedRef::default())
    }
}

/// Format a money amount with two decimals and a custom separator.
pub fn format_amount(amount: f64, decimal_separator: &str) -> String {
    format!("{:.2}", amount).replace('.', decimal_separator)
}

/// Fill the alert template for a resolved outage.
pub fn render_message(settings: &AlertSettings, downtime: Downtime) -> String {
    let discount = downtime.discount(settings.isp_bill_amount);
    settings
        .message_template
        .replace("{duration}", &downtime.formatted())
        .replace("{discount}", &format_amount(discount, &settings.decimal_separator))
}
