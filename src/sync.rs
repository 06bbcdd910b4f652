//! Brings one target directory in line with the desired endpoints.
//!
//! Every endpoint owns at most one file, named after the endpoint.  Files
//! are rewritten only when their bytes differ, and files owned by no
//! endpoint are removed.  Together this makes a pass over unchanged
//! inventory a no-op on disk.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::render::Render;
use crate::types::DesiredEndpoint;

/// What a single pass did to its directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub written: Vec<String>,
    pub removed: Vec<String>,
    /// Endpoints for which the renderer produced nothing.
    pub unrendered: Vec<String>,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        !self.written.is_empty() || !self.removed.is_empty()
    }
}

/// Write changed artifacts into `dir` and delete the ones nobody owns.
///
/// The directory is created first if needed. Any I/O failure aborts the
/// pass; work done before the failure stays on disk.
pub fn sync<R>(dir: &Path, renderer: &R, endpoints: &[DesiredEndpoint]) -> Result<SyncOutcome>
where
    R: Render + ?Sized,
{
    fs::create_dir_all(dir).map_err(|source| Error::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut outcome = SyncOutcome::default();
    for endpoint in endpoints {
        match renderer.render(endpoint) {
            Some(content) => {
                if write_if_changed(&dir.join(&endpoint.name), &content)? {
                    outcome.written.push(endpoint.name.clone());
                }
            }
            None => outcome.unrendered.push(endpoint.name.clone()),
        }
    }

    let owned: HashSet<&str> = endpoints.iter().map(|e| e.name.as_str()).collect();
    outcome.removed = remove_unowned(dir, &owned)?;

    Ok(outcome)
}

/// Write `content` to `path` unless the file already holds exactly that.
fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == content => {
            debug!("File {} is up to date", path.display());
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(Error::ReadFile {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    info!("Writing file {}", path.display());
    write_atomic(path, content).map_err(|source| Error::WriteFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Stage the bytes in a sibling temp file and rename it into place.
fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove every regular file in `dir` whose name no endpoint owns.
fn remove_unowned(dir: &Path, owned: &HashSet<&str>) -> Result<Vec<String>> {
    let read_dir_err = |source| Error::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut stale: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let file_type = entry.file_type().map_err(read_dir_err)?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !owned.contains(name.as_str()) {
            stale.push((name, entry.path()));
        }
    }
    stale.sort();

    let mut removed = Vec::with_capacity(stale.len());
    for (name, path) in stale {
        info!("Removing file {}", path.display());
        fs::remove_file(&path).map_err(|source| Error::RemoveFile { path, source })?;
        removed.push(name);
    }
    Ok(removed)
}
