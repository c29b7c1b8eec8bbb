// src/core/probes/ports.rs

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::errors::ScanError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenPort {
    pub port: u16,
    pub service: &'static str,
}

/// Results for one scanned address.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostPorts {
    pub ip: IpAddr,
    pub open_ports: Vec<OpenPort>,
}

/// The IANA service usually found on `port`.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        80 => "http",
        110 => "pop3",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        587 => "submission",
        993 => "imaps",
        995 => "pop3s",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        6379 => "redis",
        8080 => "http-alt",
        8443 => "https-alt",
        27017 => "mongodb",
        _ => "unknown",
    }
}

/// TCP connect scan of `ports` on `ip`, at most `concurrency` connections in flight.
/// A port is open when the handshake completes within `connect_timeout`; refusals and
/// timeouts both count as closed. Open ports are returned in ascending order.
pub async fn scan_host(
    ip: IpAddr,
    ports: &[u16],
    concurrency: usize,
    connect_timeout: Duration,
) -> Result<HostPorts, ScanError> {
    info!(%ip, ports = ports.len(), concurrency, "Starting TCP connect scan.");
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    let mut handles = Vec::with_capacity(ports.len());
    for &port in ports {
        let permits = Arc::clone(&permits);
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            let addr = SocketAddr::new(ip, port);
            match timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_stream)) => {
                    debug!(%addr, "Port open.");
                    Some(port)
                }
                Ok(Err(_)) | Err(_) => None,
            }
        }));
    }

    let mut open = Vec::new();
    for handle in handles {
        let joined = handle
            .await
            .map_err(|e| ScanError::probe(format!("port scan task failed: {}", e)))?;
        if let Some(port) = joined {
            open.push(port);
        }
    }
    open.sort_unstable();
    open.dedup();

    info!(%ip, open = open.len(), "TCP connect scan finished.");
    Ok(HostPorts {
        ip,
        open_ports: open.into_iter().map(|port| OpenPort { port, service: service_name(port) }).collect(),
    })
}
