use crate::types::{ContainerDetail, ContainerSummary};
use anyhow::Result;
use async_trait::async_trait;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime {
    /// List the containers that are currently running.
    /// Stopped and exited containers are never returned.
    async fn list_running(&self) -> Result<Vec<ContainerSummary>>;

    /// Fetch the full metadata of one container.
    async fn inspect(&self, id: &str) -> Result<ContainerDetail>;
}
