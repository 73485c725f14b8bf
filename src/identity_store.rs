//! Identity Store
//!
//! Filesystem-backed repository of the PKI material, laid out the way easy-rsa lays
//! out its `pki/` directory so either issuance backend can populate it:
//!
//! ```text
//! <root>/pki/
//!   ca.crt              private/ca.key
//!   dh.pem              ta.key
//!   crl.pem             revoked.json
//!   issued/<cn>.crt     private/<cn>.key
//! ```
//!
//! The store also owns the idempotency gate ([`IdentityStore::should_create`]) and the
//! write discipline every producer goes through: content lands in a sibling temporary
//! file that is renamed into place, so an artifact is either fully present or absent.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ProvisionError, Result};

pub const PKI_DIR: &str = "pki";

/// Mode for private keys inside the store.
pub const PRIVATE_MODE: u32 = 0o600;
/// Mode for certificates and public parameters inside the store.
pub const PUBLIC_MODE: u32 = 0o644;

/// Result of an idempotent creation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOutcome {
    Created,
    Existing,
}

/// Result of writing a derived file (copy, rendered document, export).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct IdentityStore {
    root: PathBuf,
}

impl IdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The PKI working area created by `InitializePKI`.
    pub fn pki_dir(&self) -> PathBuf {
        self.root.join(PKI_DIR)
    }

    pub fn issued_dir(&self) -> PathBuf {
        self.pki_dir().join("issued")
    }

    pub fn private_dir(&self) -> PathBuf {
        self.pki_dir().join("private")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.pki_dir().join("ca.crt")
    }

    pub fn ca_key(&self) -> PathBuf {
        self.private_dir().join("ca.key")
    }

    pub fn dh_params(&self) -> PathBuf {
        self.pki_dir().join("dh.pem")
    }

    pub fn auth_key(&self) -> PathBuf {
        self.pki_dir().join("ta.key")
    }

    pub fn crl(&self) -> PathBuf {
        self.pki_dir().join("crl.pem")
    }

    pub fn revocation_ledger(&self) -> PathBuf {
        self.pki_dir().join("revoked.json")
    }

    pub fn issued_cert(&self, common_name: &str) -> PathBuf {
        self.issued_dir().join(format!("{common_name}.crt"))
    }

    pub fn private_key(&self, common_name: &str) -> PathBuf {
        self.private_dir().join(format!("{common_name}.key"))
    }

    /// Where a revoked certificate is kept, keyed by serial (hex).
    pub fn revoked_cert(&self, serial: &str) -> PathBuf {
        self.pki_dir()
            .join("revoked/certs_by_serial")
            .join(format!("{}.crt", serial.to_uppercase()))
    }

    pub fn revoked_key(&self, serial: &str) -> PathBuf {
        self.pki_dir()
            .join("revoked/private_by_serial")
            .join(format!("{}.key", serial.to_uppercase()))
    }

    /// Existence Oracle: `true` when nothing exists at `path` yet.
    ///
    /// Presence alone counts as a complete prior creation; content is not inspected.
    pub fn should_create(&self, path: &Path) -> Result<bool> {
        let exists = path
            .try_exists()
            .map_err(|e| ProvisionError::storage(path, e))?;
        Ok(!exists)
    }

    /// Run `generate` only if `path` is absent, then confirm it produced `path`.
    pub fn create_if_absent<F>(&self, step: &str, path: &Path, generate: F) -> Result<ArtifactOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        if !self.should_create(path)? {
            debug!(step, path = %path.display(), "artifact present, skipping");
            return Ok(ArtifactOutcome::Existing);
        }
        generate()?;
        self.require(step, path)?;
        debug!(step, path = %path.display(), "artifact created");
        Ok(ArtifactOutcome::Created)
    }

    /// Fails with `MissingExpectedArtifact` unless `path` exists.
    pub fn require(&self, step: &str, path: &Path) -> Result<()> {
        if self.should_create(path)? {
            return Err(ProvisionError::missing(step, path));
        }
        Ok(())
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| ProvisionError::storage(path, e))
    }

    /// Read an artifact as text held in a secret container.
    pub fn read_secret(&self, path: &Path) -> Result<SecretString> {
        let text = fs::read_to_string(path).map_err(|e| ProvisionError::storage(path, e))?;
        Ok(SecretString::from(text))
    }

    pub fn write_atomic(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        write_atomic(path, contents, mode)
    }

    /// SHA-256 of the artifact at `path`, hex encoded.
    pub fn fingerprint(&self, path: &Path) -> Result<String> {
        let data = self.read(path)?;
        Ok(hex::encode(Sha256::digest(&data)))
    }
}

/// Write `contents` to a temporary sibling of `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| ProvisionError::storage(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ProvisionError::storage(dir, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ProvisionError::storage(tmp.path(), e))?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))
        .map_err(|e| ProvisionError::storage(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::storage(path, e.error))?;
    Ok(())
}

/// Write `contents` unless `path` already holds exactly those bytes.
///
/// The mode is re-applied when it has drifted, even if the content is unchanged.
pub fn write_if_changed(path: &Path, contents: &[u8], mode: u32) -> Result<WriteOutcome> {
    match fs::read(path) {
        Ok(existing) if existing == contents => {
            ensure_mode(path, mode)?;
            Ok(WriteOutcome::Unchanged)
        }
        Ok(_) => write_atomic(path, contents, mode).map(|_| WriteOutcome::Written),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            write_atomic(path, contents, mode).map(|_| WriteOutcome::Written)
        }
        Err(e) => Err(ProvisionError::storage(path, e)),
    }
}

fn ensure_mode(path: &Path, mode: u32) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| ProvisionError::storage(path, e))?;
    if metadata.permissions().mode() & 0o777 != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| ProvisionError::storage(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[test]
    fn test_layout_matches_easyrsa() {
        let store = IdentityStore::new("/srv/pki-root");
        assert_eq!(store.ca_cert(), PathBuf::from("/srv/pki-root/pki/ca.crt"));
        assert_eq!(store.ca_key(), PathBuf::from("/srv/pki-root/pki/private/ca.key"));
        assert_eq!(
            store.issued_cert("alice"),
            PathBuf::from("/srv/pki-root/pki/issued/alice.crt")
        );
        assert_eq!(
            store.private_key("alice"),
            PathBuf::from("/srv/pki-root/pki/private/alice.key")
        );
    }

    #[test]
    fn test_should_create_reflects_presence() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        let path = dir.path().join("thing");
        assert!(store.should_create(&path).unwrap());
        fs::write(&path, b"").unwrap();
        // even an empty file counts as present
        assert!(!store.should_create(&path).unwrap());
    }

    #[test]
    fn test_create_if_absent_runs_generator_once() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        let path = dir.path().join("a.pem");
        let calls = Cell::new(0);

        for _ in 0..3 {
            store
                .create_if_absent("gen", &path, || {
                    calls.set(calls.get() + 1);
                    write_atomic(&path, b"data", PUBLIC_MODE)
                })
                .unwrap();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_create_if_absent_reports_missing_output() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        let path = dir.path().join("never-written");

        let err = store.create_if_absent("gen", &path, || Ok(())).unwrap_err();
        assert!(matches!(err, ProvisionError::MissingExpectedArtifact { .. }));
    }

    #[test]
    fn test_write_atomic_sets_mode_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/key.pem");
        write_atomic(&path, b"secret", PRIVATE_MODE).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, PRIVATE_MODE);
        let entries: Vec<_> = fs::read_dir(dir.path().join("nested")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_if_changed_skips_identical_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.conf");
        assert_eq!(write_if_changed(&path, b"one", 0o644).unwrap(), WriteOutcome::Written);
        assert_eq!(write_if_changed(&path, b"one", 0o644).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(write_if_changed(&path, b"two", 0o644).unwrap(), WriteOutcome::Written);
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_write_if_changed_repairs_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        write_atomic(&path, b"x", 0o644).unwrap();
        write_if_changed(&path, b"x", 0o640).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_read_secret_and_fingerprint() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        let path = dir.path().join("ta.key");
        fs::write(&path, "abc").unwrap();

        assert_eq!(store.read_secret(&path).unwrap().expose_secret(), "abc");
        assert_eq!(
            store.fingerprint(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
