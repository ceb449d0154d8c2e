//! Host port availability checks.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// Connect timeout of a single probe.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Tells whether a host port is already bound.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Returns true if something listens on `port`.
    async fn is_taken(&self, port: u16) -> bool;
}

/// Probes `localhost` with a TCP connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_taken(&self, port: u16) -> bool {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("localhost", port))).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(port, error = %e, "Port free");
                false
            }
            Err(_) => false,
        }
    }
}

/// Fails with [`OrchestratorError::PortsTaken`] listing every bound port.
pub async fn check_ports(probe: &dyn PortProbe, ports: &[u16]) -> Result<()> {
    let mut taken = Vec::new();
    for &port in ports {
        if probe.is_taken(port).await {
            taken.push(port);
        }
    }
    if taken.is_empty() {
        Ok(())
    } else {
        warn!(ports = ?taken, "Ports already in use");
        Err(OrchestratorError::ports_taken(taken))
    }
}
