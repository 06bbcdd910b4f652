//! Derives the desired endpoints from the running containers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use crate::types::{
    ContainerDetail, DesiredEndpoint, HTPASSWD, SSL_CERT_NAME, VIRTUAL_HOST, VIRTUAL_PORT,
};

/// Why a running container produced no endpoint this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    NoName,
    InspectFailed,
    MissingVirtualHost,
    NoExposedPorts,
    AmbiguousPort,
    InvalidPort,
}

impl SkipReason {
    /// Containers that simply are not meant to be proxied.
    pub fn is_routine(self) -> bool {
        matches!(self, SkipReason::MissingVirtualHost)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoName => "no name",
            SkipReason::InspectFailed => "inspect failed",
            SkipReason::MissingVirtualHost => "no VIRTUAL_HOST",
            SkipReason::NoExposedPorts => "no exposed ports",
            SkipReason::AmbiguousPort => "ambiguous port",
            SkipReason::InvalidPort => "invalid VIRTUAL_PORT",
        };
        f.write_str(s)
    }
}

/// Endpoints found in one pass plus a tally of the containers left out.
#[derive(Debug, Default)]
pub struct Inventory {
    pub endpoints: Vec<DesiredEndpoint>,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl Inventory {
    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    /// Skips other than containers without `VIRTUAL_HOST`.
    pub fn unusual_skips(&self) -> usize {
        self.skipped
            .iter()
            .filter(|(reason, _)| !reason.is_routine())
            .map(|(_, n)| n)
            .sum()
    }
}

pub struct InventoryReader {
    ssl_dir: PathBuf,
}

impl InventoryReader {
    pub fn new(ssl_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssl_dir: ssl_dir.into(),
        }
    }

    /// Build the desired endpoints for every running container.
    ///
    /// Only a failure of the list call is an error; every per-container
    /// problem excludes that container and is counted in the result.
    pub async fn list_desired_endpoints<R>(&self, runtime: &R) -> Result<Inventory>
    where
        R: ContainerRuntime + Sync + ?Sized,
    {
        let containers = runtime.list_running().await.map_err(Error::Inventory)?;

        let mut inventory = Inventory::default();
        for summary in containers {
            let detail = match runtime.inspect(&summary.id).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(
                        "Unable to inspect container {}: {:#}",
                        summary.primary_name().unwrap_or(&summary.id),
                        e
                    );
                    inventory.skip(SkipReason::InspectFailed);
                    continue;
                }
            };

            let Some(name) = summary.primary_name().or_else(|| detail.primary_name()) else {
                warn!("Container {} has no name, skipping", summary.id);
                inventory.skip(SkipReason::NoName);
                continue;
            };

            match self.derive(name, &detail) {
                Ok(endpoint) => inventory.endpoints.push(endpoint),
                Err(reason) => inventory.skip(reason),
            }
        }
        Ok(inventory)
    }

    fn derive(
        &self,
        name: &str,
        detail: &ContainerDetail,
    ) -> std::result::Result<DesiredEndpoint, SkipReason> {
        let env = &detail.env;

        let virtual_host = match env.get(VIRTUAL_HOST).filter(|v| !v.is_empty()) {
            Some(host) => host.clone(),
            None => {
                debug!("Container {} has no `VIRTUAL_HOST`, skipping", name);
                return Err(SkipReason::MissingVirtualHost);
            }
        };

        let container_port = match env.get(VIRTUAL_PORT) {
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    debug!(
                        "Container {} has an invalid `VIRTUAL_PORT` {:?}, skipping",
                        name, raw
                    );
                    return Err(SkipReason::InvalidPort);
                }
            },
            None => {
                let mut ports = detail.exposed_ports.iter();
                match (ports.next(), ports.next()) {
                    (Some(exposed), None) => exposed.port,
                    (None, _) => {
                        debug!("Container {} does not expose any ports, skipping", name);
                        return Err(SkipReason::NoExposedPorts);
                    }
                    (Some(_), Some(_)) => {
                        debug!(
                            "Container {} exposes more than one port and has no `VIRTUAL_PORT`, skipping",
                            name
                        );
                        return Err(SkipReason::AmbiguousPort);
                    }
                }
            }
        };

        let ssl_cert_name = env
            .get(SSL_CERT_NAME)
            .filter(|v| !v.is_empty())
            .and_then(|cert| self.checked_cert_name(name, cert));

        let credential_entries = env
            .get(HTPASSWD)
            .map(|raw| parse_credentials(name, raw))
            .unwrap_or_default();

        Ok(DesiredEndpoint {
            name: name.to_string(),
            virtual_host,
            container_address: detail.ip_address.clone(),
            container_port,
            ssl_cert_name,
            credential_entries,
        })
    }

    /// Keep the certificate name only if both halves of the pair exist,
    /// since the proxy refuses to start on a dangling reference.
    fn checked_cert_name(&self, container: &str, cert: &str) -> Option<String> {
        for (ext, what) in [("crt", "certificate"), ("key", "private key")] {
            let path = self.ssl_dir.join(format!("{}.{}", cert, ext));
            if !is_file(&path) {
                warn!(
                    "Unable to find SSL {} {} for container {}, disabling HTTPS",
                    what,
                    path.display(),
                    container
                );
                return None;
            }
        }
        Some(cert.to_string())
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

/// `HTPASSWD` must be a JSON array of strings; anything else means no entries.
fn parse_credentials(container: &str, raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(
                "Unable to parse `HTPASSWD` of container {} as a JSON array ({}), ignoring",
                container, e
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContainerSummary, ExposedPort};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeRuntime {
        containers: Vec<(ContainerSummary, Option<ContainerDetail>)>,
        list_fails: bool,
    }

    impl FakeRuntime {
        fn with(mut self, name: &str, detail: Option<ContainerDetail>) -> Self {
            let summary = ContainerSummary {
                id: format!("id-{}", name),
                names: vec![format!("/{}", name)],
            };
            self.containers.push((summary, detail));
            self
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_running(&self) -> anyhow::Result<Vec<ContainerSummary>> {
            if self.list_fails {
                return Err(anyhow!("daemon unreachable"));
            }
            Ok(self.containers.iter().map(|(s, _)| s.clone()).collect())
        }

        async fn inspect(&self, id: &str) -> anyhow::Result<ContainerDetail> {
            self.containers
                .iter()
                .find(|(s, _)| s.id == id)
                .and_then(|(_, d)| d.clone())
                .ok_or_else(|| anyhow!("no such container {}", id))
        }
    }

    fn detail(env: &[(&str, &str)], ports: &[u16]) -> ContainerDetail {
        ContainerDetail {
            names: vec![],
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            exposed_ports: ports.iter().map(|p| ExposedPort::tcp(*p)).collect::<BTreeSet<_>>(),
            ip_address: "172.17.0.2".into(),
        }
    }

    async fn read(runtime: &FakeRuntime, ssl_dir: &Path) -> Inventory {
        InventoryReader::new(ssl_dir)
            .list_desired_endpoints(runtime)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn single_exposed_port_is_inferred() {
        let tmp = TempDir::new().unwrap();
        let runtime =
            FakeRuntime::default().with("web1", Some(detail(&[("VIRTUAL_HOST", "a.com")], &[8080])));

        let inventory = read(&runtime, tmp.path()).await;
        assert_eq!(
            inventory.endpoints,
            vec![DesiredEndpoint {
                name: "web1".into(),
                virtual_host: "a.com".into(),
                container_address: "172.17.0.2".into(),
                container_port: 8080,
                ssl_cert_name: None,
                credential_entries: vec![],
            }]
        );
        assert!(inventory.skipped.is_empty());
    }

    #[tokio::test]
    async fn exclusion_rules() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::default()
            .with("db", Some(detail(&[], &[5432])))
            .with("blank", Some(detail(&[("VIRTUAL_HOST", "")], &[80])))
            .with("multi", Some(detail(&[("VIRTUAL_HOST", "m.com")], &[80, 443])))
            .with("none", Some(detail(&[("VIRTUAL_HOST", "n.com")], &[])))
            .with(
                "badport",
                Some(detail(&[("VIRTUAL_HOST", "b.com"), ("VIRTUAL_PORT", "http")], &[80])),
            )
            .with(
                "override",
                Some(detail(&[("VIRTUAL_HOST", "o.com"), ("VIRTUAL_PORT", "443")], &[80, 443])),
            );

        let inventory = read(&runtime, tmp.path()).await;
        let names: Vec<_> = inventory.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["override"]);
        assert_eq!(inventory.endpoints[0].container_port, 443);

        assert_eq!(inventory.skipped[&SkipReason::MissingVirtualHost], 2);
        assert_eq!(inventory.skipped[&SkipReason::AmbiguousPort], 1);
        assert_eq!(inventory.skipped[&SkipReason::NoExposedPorts], 1);
        assert_eq!(inventory.skipped[&SkipReason::InvalidPort], 1);
        assert_eq!(inventory.unusual_skips(), 3);
    }

    #[tokio::test]
    async fn same_port_on_two_protocols_is_ambiguous() {
        let tmp = TempDir::new().unwrap();
        let mut dns = detail(&[("VIRTUAL_HOST", "dns.com")], &[53]);
        dns.exposed_ports.insert(ExposedPort {
            port: 53,
            protocol: "udp".into(),
        });
        let runtime = FakeRuntime::default().with("dns", Some(dns));

        let inventory = read(&runtime, tmp.path()).await;
        assert!(inventory.endpoints.is_empty());
        assert_eq!(inventory.skipped[&SkipReason::AmbiguousPort], 1);
    }

    #[tokio::test]
    async fn inspect_failure_skips_only_that_container() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::default()
            .with("gone", None)
            .with("web1", Some(detail(&[("VIRTUAL_HOST", "a.com")], &[80])));

        let inventory = read(&runtime, tmp.path()).await;
        assert_eq!(inventory.endpoints.len(), 1);
        assert_eq!(inventory.skipped[&SkipReason::InspectFailed], 1);
    }

    #[tokio::test]
    async fn name_falls_back_to_inspected_name() {
        let tmp = TempDir::new().unwrap();
        let mut named = detail(&[("VIRTUAL_HOST", "a.com")], &[80]);
        named.names = vec!["/from-inspect".into()];
        let runtime = FakeRuntime {
            containers: vec![
                (
                    ContainerSummary {
                        id: "id-1".into(),
                        names: vec![],
                    },
                    Some(named),
                ),
                (
                    ContainerSummary {
                        id: "id-2".into(),
                        names: vec![],
                    },
                    Some(detail(&[("VIRTUAL_HOST", "b.com")], &[80])),
                ),
            ],
            ..Default::default()
        };

        let inventory = read(&runtime, tmp.path()).await;
        assert_eq!(inventory.endpoints.len(), 1);
        assert_eq!(inventory.endpoints[0].name, "from-inspect");
        assert_eq!(inventory.skipped[&SkipReason::NoName], 1);
    }

    #[tokio::test]
    async fn list_failure_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime {
            list_fails: true,
            ..Default::default()
        };
        let err = InventoryReader::new(tmp.path())
            .list_desired_endpoints(&runtime)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inventory(_)));
    }

    #[tokio::test]
    async fn ssl_requires_both_cert_and_key() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("full.crt"), "cert").unwrap();
        fs::write(tmp.path().join("full.key"), "key").unwrap();
        fs::write(tmp.path().join("half.crt"), "cert").unwrap();

        let runtime = FakeRuntime::default()
            .with(
                "a",
                Some(detail(&[("VIRTUAL_HOST", "a.com"), ("SSL_CERT_NAME", "full")], &[80])),
            )
            .with(
                "b",
                Some(detail(&[("VIRTUAL_HOST", "b.com"), ("SSL_CERT_NAME", "half")], &[80])),
            )
            .with(
                "c",
                Some(detail(&[("VIRTUAL_HOST", "c.com"), ("SSL_CERT_NAME", "foo")], &[80])),
            );

        let inventory = read(&runtime, tmp.path()).await;
        let certs: Vec<_> = inventory
            .endpoints
            .iter()
            .map(|e| e.ssl_cert_name.as_deref())
            .collect();
        assert_eq!(certs, vec![Some("full"), None, None]);
    }

    #[tokio::test]
    async fn credentials_parsed_best_effort() {
        let tmp = TempDir::new().unwrap();
        let runtime = FakeRuntime::default()
            .with(
                "good",
                Some(detail(
                    &[("VIRTUAL_HOST", "g.com"), ("HTPASSWD", r#"["alice:$apr1$x", "bob:$apr1$y"]"#)],
                    &[80],
                )),
            )
            .with(
                "bad",
                Some(detail(&[("VIRTUAL_HOST", "b.com"), ("HTPASSWD", "alice:secret")], &[80])),
            );

        let inventory = read(&runtime, tmp.path()).await;
        assert_eq!(
            inventory.endpoints[0].credential_entries,
            vec!["alice:$apr1$x".to_string(), "bob:$apr1$y".to_string()]
        );
        assert!(inventory.endpoints[1].credential_entries.is_empty());
        assert!(inventory.skipped.is_empty());
    }
}
