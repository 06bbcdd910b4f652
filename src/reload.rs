//! Asks the proxy to re-read its configuration.
//!
//! The reload command cannot be trusted to exit non-zero on failure (some
//! service wrappers report success while the proxy rejected the new
//! configuration), so its combined output is also checked for a failure
//! marker.  Only a zero exit status with no marker counts as success.

use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    ExitStatus {
        command: String,
        status: String,
        output: String,
    },
    #[error("`{command}` output contains {marker:?}: {output}")]
    FailureMarker {
        command: String,
        marker: String,
        output: String,
    },
}

#[async_trait]
pub trait Reloader {
    async fn reload(&self) -> Result<(), ReloadError>;
}

/// Runs an external reload command such as `nginx -s reload`.
#[derive(Debug, Clone)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
    failure_marker: String,
}

impl CommandReloader {
    /// `command` is the program followed by its arguments.
    pub fn new(command: &[String], failure_marker: impl Into<String>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            failure_marker: failure_marker.into(),
        })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Decide the outcome from the exit status and the combined output.
    fn classify(&self, status: std::process::ExitStatus, output: &str) -> Result<(), ReloadError> {
        if !status.success() {
            return Err(ReloadError::ExitStatus {
                command: self.display(),
                status: status.to_string(),
                output: output.trim().to_string(),
            });
        }
        if output.contains(&self.failure_marker) {
            return Err(ReloadError::FailureMarker {
                command: self.display(),
                marker: self.failure_marker.clone(),
                output: output.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Reloader for CommandReloader {
    async fn reload(&self) -> Result<(), ReloadError> {
        debug!("Running {}", self.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ReloadError::Spawn {
                command: self.display(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        self.classify(output.status, &combined)?;
        info!("Reloaded proxy configuration");
        Ok(())
    }
}
