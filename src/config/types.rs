//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::link::ServiceId;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub link: LinkConfig,
    pub transport: TransportConfig,
    pub monitoring: MonitoringConfig,
}

/// Link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Well-known service identifier both sides listen and dial under
    pub service_uuid: Uuid,
    /// Name advertised to peers
    pub node_name: String,
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    pub bind_addr: SocketAddr,
    pub read_buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Config {
    pub fn service_id(&self) -> ServiceId {
        ServiceId::new(self.link.service_uuid)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkConfig {
                service_uuid: ServiceId::default().uuid(),
                node_name: "peerlink".to_string(),
            },
            transport: TransportConfig {
                bind_addr: "127.0.0.1:7655".parse().unwrap(),
                read_buffer_size: 1024,
                dial_timeout: Duration::from_secs(10),
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
