//! Artifact Distributor
//!
//! Copies named artifacts out of the Identity Store into role-scoped directories.
//! Copies are byte-for-byte and independent of the originals.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::configs::Paths;
use crate::error::{ProvisionError, Result};
use crate::identity_store::{write_if_changed, IdentityStore, WriteOutcome};
use crate::roster::validate_name;
use crate::server_identity::SERVER_COMMON_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRole {
    /// Read by the local VPN process.
    Server,
    /// May later be fetched off the host.
    User,
}

impl DestinationRole {
    pub fn mode(self) -> u32 {
        match self {
            DestinationRole::Server => 0o644,
            DestinationRole::User => 0o640,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity<'n> {
    Server,
    Client(&'n str),
}

impl Identity<'_> {
    pub fn common_name(&self) -> &str {
        match self {
            Identity::Server => SERVER_COMMON_NAME,
            Identity::Client(name) => name,
        }
    }
}

/// A file this run wrote, or found already up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub outcome: WriteOutcome,
}

pub struct ArtifactDistributor<'a> {
    store: &'a IdentityStore,
    server_dir: &'a Path,
    users_dir: &'a Path,
}

impl<'a> ArtifactDistributor<'a> {
    pub fn new(store: &'a IdentityStore, paths: &'a Paths) -> Self {
        Self {
            store,
            server_dir: &paths.server_dir,
            users_dir: &paths.users_dir,
        }
    }

    /// Per-client directory under the users directory.
    pub fn client_dir(&self, name: &str) -> PathBuf {
        self.users_dir.join(name)
    }

    fn destination(&self, identity: Identity<'_>, role: DestinationRole) -> PathBuf {
        match role {
            DestinationRole::Server => self.server_dir.to_path_buf(),
            DestinationRole::User => self.client_dir(identity.common_name()),
        }
    }

    /// Store artifacts `identity` needs, paired with their file name at the destination.
    fn artifacts(&self, identity: Identity<'_>) -> Vec<(PathBuf, String)> {
        let cn = identity.common_name();
        let mut artifacts = vec![
            (self.store.ca_cert(), "ca.crt".to_string()),
            (self.store.auth_key(), "ta.key".to_string()),
            (self.store.issued_cert(cn), format!("{cn}.crt")),
            (self.store.private_key(cn), format!("{cn}.key")),
        ];
        if identity == Identity::Server {
            artifacts.push((self.store.dh_params(), "dh.pem".to_string()));
            artifacts.push((self.store.crl(), "crl.pem".to_string()));
        }
        artifacts
    }

    pub fn distribute(
        &self,
        identity: Identity<'_>,
        role: DestinationRole,
    ) -> Result<Vec<FileRecord>> {
        let step = format!("distribute {}", identity.common_name());
        let dest_dir = self.destination(identity, role);
        self.artifacts(identity)
            .into_iter()
            .map(|(source, file_name)| -> Result<FileRecord> {
                self.store.require(&step, &source)?;
                let contents = self.store.read(&source)?;
                let path = dest_dir.join(file_name);
                let outcome = write_if_changed(&path, &contents, role.mode())?;
                debug!(path = %path.display(), ?outcome, "distributed");
                Ok(FileRecord { path, outcome })
            })
            .collect()
    }

    /// Delete everything distributed to `name`, including its rendered bundle.
    pub fn remove_client(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let dir = self.client_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProvisionError::storage(dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> Paths {
        Paths {
            store_root: dir.path().join("store"),
            server_dir: dir.path().join("server"),
            users_dir: dir.path().join("users"),
            export_dir: dir.path().join("out"),
        }
    }

    fn seed(store: &IdentityStore, names: &[&str]) {
        fs::create_dir_all(store.issued_dir()).unwrap();
        fs::create_dir_all(store.private_dir()).unwrap();
        for path in [store.ca_cert(), store.auth_key(), store.dh_params(), store.crl()] {
            fs::write(&path, path.display().to_string()).unwrap();
        }
        for name in names {
            fs::write(store.issued_cert(name), format!("{name} cert")).unwrap();
            fs::write(store.private_key(name), format!("{name} key")).unwrap();
        }
    }

    #[test]
    fn test_server_artifacts_land_in_server_dir() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let store = IdentityStore::new(&paths.store_root);
        seed(&store, &[SERVER_COMMON_NAME]);
        let distributor = ArtifactDistributor::new(&store, &paths);

        let records = distributor
            .distribute(Identity::Server, DestinationRole::Server)
            .unwrap();
        assert_eq!(records.len(), 6);
        for name in ["ca.crt", "ta.key", "server.crt", "server.key", "dh.pem", "crl.pem"] {
            let path = paths.server_dir.join(name);
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o644, "{name}");
        }
    }

    #[test]
    fn test_client_copy_is_independent_of_store() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let store = IdentityStore::new(&paths.store_root);
        seed(&store, &["alice"]);
        let distributor = ArtifactDistributor::new(&store, &paths);

        distributor
            .distribute(Identity::Client("alice"), DestinationRole::User)
            .unwrap();
        let copy = distributor.client_dir("alice").join("alice.key");
        let mode = fs::metadata(&copy).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);

        fs::write(&copy, "tampered").unwrap();
        assert_eq!(fs::read_to_string(store.private_key("alice")).unwrap(), "alice key");

        // the next pass restores the copy
        let records = distributor
            .distribute(Identity::Client("alice"), DestinationRole::User)
            .unwrap();
        let rewritten: Vec<_> = records
            .iter()
            .filter(|r| r.outcome == WriteOutcome::Written)
            .collect();
        assert_eq!(rewritten.len(), 1);
        assert_eq!(fs::read_to_string(&copy).unwrap(), "alice key");
    }

    #[test]
    fn test_missing_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let store = IdentityStore::new(&paths.store_root);
        seed(&store, &[]);
        let distributor = ArtifactDistributor::new(&store, &paths);

        assert!(matches!(
            distributor.distribute(Identity::Client("bob"), DestinationRole::User),
            Err(ProvisionError::MissingExpectedArtifact { .. })
        ));
    }

    #[test]
    fn test_remove_client_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let store = IdentityStore::new(&paths.store_root);
        seed(&store, &["alice"]);
        let distributor = ArtifactDistributor::new(&store, &paths);
        distributor
            .distribute(Identity::Client("alice"), DestinationRole::User)
            .unwrap();

        distributor.remove_client("alice").unwrap();
        assert!(!distributor.client_dir("alice").exists());
        distributor.remove_client("alice").unwrap();
    }
}
