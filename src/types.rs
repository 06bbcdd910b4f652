//! Data structures shared by the reconciliation loop.
//!
//! The container records mirror the two calls the inventory collaborator
//! answers (list running, inspect one).  [`DesiredEndpoint`] is the
//! desired-state record derived from a single container; it lives for one
//! cycle only and is serialised with [`serde`](https://serde.rs/) to feed
//! the configuration template.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

/// Environment variable carrying the host name to route on.
pub const VIRTUAL_HOST: &str = "VIRTUAL_HOST";
/// Environment variable overriding the backend port.
pub const VIRTUAL_PORT: &str = "VIRTUAL_PORT";
/// Environment variable naming a certificate/key pair in the SSL directory.
pub const SSL_CERT_NAME: &str = "SSL_CERT_NAME";
/// Environment variable holding a JSON array of `user:hash` entries.
pub const HTPASSWD: &str = "HTPASSWD";

/// A running container as returned by the list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Container names as reported by the runtime, usually with a leading `/`.
    pub names: Vec<String>,
}

impl ContainerSummary {
    /// Primary name with the runtime's leading `/` removed.
    pub fn primary_name(&self) -> Option<&str> {
        primary_name(&self.names)
    }
}

/// Full metadata for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetail {
    pub names: Vec<String>,
    pub env: HashMap<String, String>,
    /// Exposed ports; `53/tcp` and `53/udp` are two entries.
    pub exposed_ports: BTreeSet<ExposedPort>,
    pub ip_address: String,
}

/// One key of the runtime's port map, such as `8080/tcp`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: String,
}

impl ExposedPort {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: "tcp".into(),
        }
    }
}

impl ContainerDetail {
    pub fn primary_name(&self) -> Option<&str> {
        primary_name(&self.names)
    }
}

fn primary_name(names: &[String]) -> Option<&str> {
    names
        .first()
        .map(|n| n.trim_start_matches('/'))
        .filter(|n| !n.is_empty())
}

/// Desired proxy routing for one container.
///
/// `name` is unique within a cycle and doubles as the artifact file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesiredEndpoint {
    pub name: String,
    pub virtual_host: String,
    pub container_address: String,
    pub container_port: u16,
    /// Present only when both `<name>.crt` and `<name>.key` exist.
    pub ssl_cert_name: Option<String>,
    pub credential_entries: Vec<String>,
}
