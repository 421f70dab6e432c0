//! Local workspace holding the extracted build output

use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use super::ArtifactError;
use crate::error::{PublishError, Result};

/// Directory the artifact is extracted into and uploaded from
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove anything left from a previous run and recreate the directory
    pub fn prepare(&self) -> Result<()> {
        let is_filesystem_root = self.root.components().all(|c| {
            matches!(c, Component::RootDir | Component::Prefix(_) | Component::CurDir)
        });
        if is_filesystem_root {
            return Err(PublishError::Configuration(format!(
                "refusing to clear workspace {}",
                self.root.display()
            )));
        }

        if self.root.exists() {
            debug!("Clearing workspace {}", self.root.display());
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Unpack a zip archive into the workspace, returning the file count.
    ///
    /// Entries that would escape the workspace are rejected.
    pub fn extract_zip(&self, data: &[u8]) -> std::result::Result<usize, ArtifactError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
        let mut extracted = 0;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let Some(relative) = file.enclosed_name() else {
                return Err(ArtifactError::Archive(format!(
                    "entry '{}' escapes the workspace",
                    file.name()
                )));
            };
            let target = self.root.join(relative);

            if file.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out = fs::File::create(&target)?;
            std::io::copy(&mut file, &mut out)?;
            extracted += 1;
        }

        info!(files = extracted, "Extracted artifact into {}", self.root.display());
        Ok(extracted)
    }

    /// Confirm the workspace exists and holds `entry_point`
    pub fn verify_entry_point(&self, entry_point: &str) -> Result<PathBuf> {
        if !self.root.is_dir() {
            return Err(PublishError::PreconditionFailed(format!(
                "workspace {} does not exist",
                self.root.display()
            )));
        }

        let path = self.root.join(entry_point);
        if !path.is_file() {
            return Err(PublishError::PreconditionFailed(format!(
                "entry point {} missing from {}",
                entry_point,
                self.root.display()
            )));
        }
        Ok(path)
    }
}
