//! Errors that end a reconciliation cycle.
//!
//! Anything that reaches this type aborts the process; per-container
//! problems never do and are reported through the cycle report instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::reload::ReloadError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to fetch running containers")]
    Inventory(#[source] anyhow::Error),

    #[error("unable to create directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to list directory {}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to read {}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to write {}", path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to remove {}", path.display())]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to reload proxy configuration")]
    Reload(#[from] ReloadError),
}
