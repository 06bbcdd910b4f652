use super::ContainerRuntime;
use crate::types::{ContainerDetail, ContainerSummary, ExposedPort};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::models::ContainerInspectResponse;
use bollard::Docker;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Seconds before a request to the Docker daemon times out.
const DOCKER_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// An explicit socket path wins; otherwise the local defaults apply,
    /// which honour `DOCKER_HOST`.
    pub fn connect(socket: Option<&Path>) -> Result<Self> {
        let docker = match socket {
            Some(path) => {
                let path = path
                    .to_str()
                    .ok_or_else(|| anyhow!("Docker socket path is not valid UTF-8: {:?}", path))?;
                let path = path.trim_start_matches("unix://");
                info!("Connecting to Docker socket {}", path);
                Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| anyhow!("Cannot connect to Docker socket '{}': {}", path, e))?
            }
            None => Docker::connect_with_local_defaults()
                .map_err(|e| anyhow!("Cannot connect to Docker: {}", e))?,
        };
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        let summaries = containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                Some(ContainerSummary {
                    id,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>();
        debug!("Docker reports {} running containers", summaries.len());
        Ok(summaries)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail> {
        let detail = self.docker.inspect_container(id, None).await?;
        Ok(to_detail(detail))
    }
}

fn to_detail(detail: ContainerInspectResponse) -> ContainerDetail {
    let names = detail.name.clone().into_iter().collect();
    let config = detail.config.unwrap_or_default();
    let settings = detail.network_settings.unwrap_or_default();

    let env = parse_env(config.env.as_deref().unwrap_or_default());

    let mut exposed_ports = settings
        .ports
        .as_ref()
        .map(|ports| parse_ports(ports.keys()))
        .unwrap_or_default();
    if exposed_ports.is_empty() {
        if let Some(ports) = &config.exposed_ports {
            exposed_ports = parse_ports(ports.keys());
        }
    }

    let ip_address = match settings.ip_address.filter(|ip| !ip.is_empty()) {
        Some(ip) => ip,
        None => {
            let mut networks = settings
                .networks
                .unwrap_or_default()
                .into_iter()
                .collect::<Vec<_>>();
            networks.sort_by(|a, b| a.0.cmp(&b.0));
            networks
                .into_iter()
                .filter_map(|(_, net)| net.ip_address)
                .find(|ip| !ip.is_empty())
                .unwrap_or_default()
        }
    };

    ContainerDetail {
        names,
        env,
        exposed_ports,
        ip_address,
    }
}

/// Split `KEY=VALUE` strings on the first `=`. Entries without one are dropped.
fn parse_env(raw: &[String]) -> HashMap<String, String> {
    raw.iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Parse Docker port keys such as `8080/tcp`; a key without a protocol is tcp.
fn parse_ports<'a>(keys: impl Iterator<Item = &'a String>) -> BTreeSet<ExposedPort> {
    keys.filter_map(|key| {
        let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
        Some(ExposedPort {
            port: port.parse().ok()?,
            protocol: protocol.to_string(),
        })
    })
    .collect()
}
