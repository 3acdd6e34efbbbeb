//! Router diagnostics captured when every endpoint is unreachable.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Fetches the router's diagnostic state as opaque text.
///
/// Failures are swallowed: an empty string means "nothing captured".
#[async_trait]
pub trait DiagnosticsFetcher: Send + Sync {
    async fn fetch_router_state(&self) -> String;
}

/// Diagnostics disabled.
#[derive(Debug, Default, Clone)]
pub struct NoDiagnostics;

#[async_trait]
impl DiagnosticsFetcher for NoDiagnostics {
    async fn fetch_router_state(&self) -> String {
        String::new()
    }
}

/// Queries a Starlink dish status over gRPC through the `grpcurl` CLI.
#[derive(Debug, Clone)]
pub struct GrpcurlDiagnostics {
    address: String,
    timeout: Duration,
}

impl GrpcurlDiagnostics {
    const METHOD: &'static str = "SpaceX.API.Device.Device/Handle";
    const REQUEST: &'static str = r#"{"get_status":{}}"#;

    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    async fn run(&self) -> Result<String, String> {
        let mut command = Command::new("grpcurl");
        command
            .args(["-plaintext", "-d", Self::REQUEST, &self.address, Self::METHOD])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| format!("failed to execute grpcurl: {}", e))?;

        if !output.status.success() {
            return Err(format!(
                "grpcurl exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl DiagnosticsFetcher for GrpcurlDiagnostics {
    async fn fetch_router_state(&self) -> String {
        match self.run().await {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!("Router diagnostics from {} unavailable: {}", self.address, e);
                String::new()
            }
        }
    }
}
