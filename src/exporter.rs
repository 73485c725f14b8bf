//! Bundle Exporter
//!
//! Copies each rendered client bundle from `users/<name>/` to the operator's
//! output directory as `<name>.<extension>`, one flat file per client.
//!
//! # File Modes
//!
//! The export directory is part of the user-facing area, so exported bundles get
//! the same 0640 mode as the distributed copies in `users/<name>/`. A drifted mode
//! is repaired on the next export even when the content is unchanged.
//!
//! # Failures
//!
//! A bundle that was never rendered fails the export for that client only
//! (`MissingExpectedArtifact`). Names are checked with the roster's rules first,
//! so an export or removal never reaches outside the export directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::bundle::bundle_file_name;
use crate::configs::AppConfig;
use crate::distributor::{DestinationRole, FileRecord};
use crate::error::{ProvisionError, Result};
use crate::identity_store::write_if_changed;
use crate::roster::validate_name;

pub struct BundleExporter<'a> {
    users_dir: &'a Path,
    export_dir: &'a Path,
    extension: &'a str,
}

impl<'a> BundleExporter<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self {
            users_dir: &config.paths.users_dir,
            export_dir: &config.paths.export_dir,
            extension: &config.bundles.extension,
        }
    }

    pub fn export_path(&self, name: &str) -> PathBuf {
        self.export_dir.join(bundle_file_name(name, self.extension))
    }

    pub fn export(&self, name: &str) -> Result<FileRecord> {
        validate_name(name)?;
        let file_name = bundle_file_name(name, self.extension);
        let source = self.users_dir.join(name).join(&file_name);
        let contents = match fs::read(&source) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProvisionError::missing(format!("export {name}"), source));
            }
            Err(e) => return Err(ProvisionError::storage(source, e)),
        };
        let path = self.export_dir.join(file_name);
        let outcome = write_if_changed(&path, &contents, DestinationRole::User.mode())?;
        info!(client = name, path = %path.display(), ?outcome, "bundle exported");
        Ok(FileRecord { path, outcome })
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let path = self.export_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProvisionError::storage(path, e)),
        }
    }
}
