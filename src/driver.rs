//! The reconciliation loop.
//!
//! One cycle: discover endpoints, sync the configuration directory, sync
//! the credentials directory, reload the proxy if either pass changed
//! anything, then sleep.  Cycles never overlap and any error ends the loop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use tokio::time::sleep;

use crate::config::Config;
use crate::error::Result;
use crate::inventory::{InventoryReader, SkipReason};
use crate::reload::Reloader;
use crate::render::{Artifact, Template};
use crate::runtime::ContainerRuntime;
use crate::sync::{sync, SyncOutcome};

/// Summary of one cycle, for logging.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub endpoints: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Skips for reasons other than a missing `VIRTUAL_HOST`.
    pub unusual_skips: usize,
    pub config: SyncOutcome,
    pub credentials: SyncOutcome,
    pub reloaded: bool,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        self.config.changed() || self.credentials.changed()
    }

    fn log(&self) {
        let summary = format!(
            "Cycle: {} endpoints, skipped {:?}, config +{} -{} ({} unrendered), \
             credentials +{} -{}, reloaded: {}",
            self.endpoints,
            self.skipped
                .iter()
                .map(|(reason, n)| format!("{}={}", reason, n))
                .collect::<Vec<_>>(),
            self.config.written.len(),
            self.config.removed.len(),
            self.config.unrendered.len(),
            self.credentials.written.len(),
            self.credentials.removed.len(),
            self.reloaded,
        );
        if self.changed() || self.unusual_skips > 0 || !self.config.unrendered.is_empty() {
            info!("{}", summary);
        } else {
            debug!("{}", summary);
        }
    }
}

pub struct Reconciler<R, L> {
    runtime: R,
    reloader: L,
    template: Template,
    inventory: InventoryReader,
    config_dir: PathBuf,
    credentials_dir: PathBuf,
    interval: Duration,
}

impl<R, L> Reconciler<R, L>
where
    R: ContainerRuntime + Sync,
    L: Reloader + Sync,
{
    pub fn new(config: &Config, runtime: R, reloader: L, template: Template) -> Self {
        Self {
            runtime,
            reloader,
            template,
            inventory: InventoryReader::new(&config.ssl_dir),
            config_dir: config.config_dir.clone(),
            credentials_dir: config.credentials_dir.clone(),
            interval: config.poll_interval(),
        }
    }

    /// Run cycles until one fails.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Reconciling {} and {} every {}s",
            self.config_dir.display(),
            self.credentials_dir.display(),
            self.interval.as_secs()
        );
        loop {
            self.run_cycle().await?;
            sleep(self.interval).await;
        }
    }

    /// One discover, sync, sync, reload-if-needed pass.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let inventory = self.inventory.list_desired_endpoints(&self.runtime).await?;
        let endpoints = &inventory.endpoints;

        let mut report = CycleReport {
            endpoints: endpoints.len(),
            skipped: inventory.skipped.clone(),
            unusual_skips: inventory.unusual_skips(),
            ..Default::default()
        };

        report.config = sync(&self.config_dir, &Artifact::Config(&self.template), endpoints)?;
        report.credentials = sync(&self.credentials_dir, &Artifact::Credentials, endpoints)?;

        if report.changed() {
            self.reloader.reload().await?;
            report.reloaded = true;
        } else {
            debug!("Skipped reloading proxy configuration");
        }

        report.log();
        Ok(report)
    }
}
