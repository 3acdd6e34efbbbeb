//! PingWatch - Internet Reachability Monitor
//!
//! Probes a list of public DNS resolvers on a fixed interval, records every
//! outcome in SQLite, posts an alert when an outage ends, and serves a
//! read-only dashboard over the recorded history.

mod config;
mod db;
mod notify;
mod outage;
mod probe;
mod scheduler;
mod web;

use config::Config;
use db::Store;
use notify::{LogNotifier, Notifier, WebhookNotifier};
use probe::{
    CachedWeather, DiagnosticsFetcher, GrpcurlDiagnostics, IcmpReachability, NoDiagnostics,
    NoWeather, OpenMeteoWeather, Prober, WeatherFetcher,
};
use scheduler::{Monitor, ProgressBar};
use web::Server;

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const PROGRESS_WIDTH: usize = 120;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = Arc::new(Config::load()?);
    tracing::info!("Starting PingWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    match store.latest_sample()? {
        Some(sample) => tracing::info!(
            "Database holds {} samples, last at {}",
            store.count()?,
            sample.timestamp
        ),
        None => tracing::info!("Database initialized, no samples yet"),
    }

    let diagnostics: Arc<dyn DiagnosticsFetcher> = match &cfg.probe.router_grpc_addr {
        Some(addr) => {
            tracing::info!("Router diagnostics from {}", addr);
            Arc::new(GrpcurlDiagnostics::new(addr, cfg.probe.timeout))
        }
        None => Arc::new(NoDiagnostics),
    };

    let weather: Arc<dyn WeatherFetcher> = match &cfg.weather {
        Some(w) => {
            tracing::info!("Weather for {}, {} every {:?}", w.latitude, w.longitude, w.refresh);
            let source = OpenMeteoWeather::new(w.latitude, w.longitude, HTTP_TIMEOUT)?;
            Arc::new(CachedWeather::new(Arc::new(source), w.refresh))
        }
        None => Arc::new(NoWeather),
    };

    let notifier: Arc<dyn Notifier> = match &cfg.alert.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url,
            cfg.alert.token.clone(),
            cfg.alert.thread_id.clone(),
            HTTP_TIMEOUT,
        )?),
        None => {
            tracing::info!("No alert webhook configured, alerts go to the log");
            Arc::new(LogNotifier)
        }
    };

    let prober = Prober::new(
        cfg.probe.endpoints.clone(),
        cfg.probe.timeout,
        cfg.probe.attempts,
        Arc::new(IcmpReachability),
        diagnostics,
    );
    let monitor = Monitor::new(prober, weather, store.clone(), notifier, cfg.alert.clone());

    let progress = cfg.progress.then(|| ProgressBar::new(io::stdout(), PROGRESS_WIDTH));
    let probe_loop = tokio::spawn(monitor.run(cfg.probe.interval, progress));

    // Start web server
    let server = Server::new(cfg.clone(), store);
    tokio::select! {
        result = server.start() => {
            if let Err(e) = &result {
                tracing::error!("Dashboard server stopped: {}", e);
            }
            probe_loop.abort();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            probe_loop.abort();
        }
    }

    Ok(())
}
