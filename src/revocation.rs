//! Revocation Manager
//!
//! Owns the Authority's revocation list (`pki/crl.pem`).
//!
//! # Lifecycle
//!
//! - [`RevocationManager::generate_crl`] publishes the initial, empty list once the
//!   Authority exists and is skipped on every later run
//! - [`RevocationManager::refresh_crl`] republishes the list after a client is
//!   retired; the new list replaces the old one in a single rename
//!
//! # Verification
//!
//! A list is only useful if a TLS peer can match it to its issuer and apply it.
//! [`RevocationManager::verify_crl`] checks the signature against the Authority,
//! and [`RevocationManager::check_certificate`] runs full chain verification with
//! revocation checking enabled, as OpenVPN's `crl-verify` does.

use std::path::Path;

use openssl::error::ErrorStack;
use openssl::ssl::SslFiletype;
use openssl::stack::Stack;
use openssl::x509::store::{X509Lookup, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509Crl, X509StoreContext, X509};
use tracing::{debug, info};

use crate::authority::require_authority;
use crate::error::{ProvisionError, Result};
use crate::identity_store::{ArtifactOutcome, IdentityStore};
use crate::issuer::Issuer;
use crate::pipeline::Stage;

pub struct RevocationManager<'a> {
    store: &'a IdentityStore,
    issuer: &'a dyn Issuer,
}

impl<'a> RevocationManager<'a> {
    pub fn new(store: &'a IdentityStore, issuer: &'a dyn Issuer) -> Self {
        Self { store, issuer }
    }

    /// GenerateCRL: produce the initial list if none exists.
    pub fn generate_crl(&self) -> Result<ArtifactOutcome> {
        require_authority(self.store, Stage::RevocationList)?;
        self.store
            .create_if_absent("gen-crl", &self.store.crl(), || {
                self.issuer.gen_crl(self.store)
            })
    }

    /// Regenerate the list after the revoked set changed. The new list replaces
    /// the old one in a single rename.
    pub fn refresh_crl(&self) -> Result<()> {
        require_authority(self.store, Stage::RevocationList)?;
        self.issuer.gen_crl(self.store)?;
        self.store.require("gen-crl", &self.store.crl())?;
        info!(path = %self.store.crl().display(), "revocation list refreshed");
        Ok(())
    }

    /// Check the list's signature against the Authority certificate's public key.
    pub fn verify_crl(&self) -> Result<bool> {
        let step = "verify-crl";
        let crl = self.load_crl(step)?;
        let ca_cert = X509::from_pem(&self.store.read(&self.store.ca_cert())?)
            .map_err(|e| ProvisionError::tool(step, e))?;
        let ca_key = ca_cert
            .public_key()
            .map_err(|e| ProvisionError::tool(step, e))?;
        crl.verify(&ca_key).map_err(|e| ProvisionError::tool(step, e))
    }

    /// Verify the certificate at `cert_path` against the Authority with the
    /// current revocation list applied. `Ok(false)` means the chain was rejected,
    /// for example because the certificate is revoked.
    pub fn check_certificate(&self, cert_path: &Path) -> Result<bool> {
        let step = "verify-chain";
        let tool = |e: ErrorStack| ProvisionError::tool(step, e);
        let ca_cert = X509::from_pem(&self.store.read(&self.store.ca_cert())?).map_err(tool)?;
        let cert = X509::from_pem(&self.store.read(cert_path)?).map_err(tool)?;
        let crl = self.store.crl();
        self.store.require(step, &crl)?;

        let mut builder = X509StoreBuilder::new().map_err(tool)?;
        builder.add_cert(ca_cert).map_err(tool)?;
        builder
            .add_lookup(X509Lookup::file())
            .map_err(tool)?
            .load_crl_file(&crl, SslFiletype::PEM)
            .map_err(tool)?;
        builder.set_flags(X509VerifyFlags::CRL_CHECK).map_err(tool)?;
        let trust = builder.build();

        let chain: Stack<X509> = Stack::new().map_err(tool)?;
        let mut context = X509StoreContext::new().map_err(tool)?;
        let (accepted, reason) = context
            .init(&trust, &cert, &chain, |c| {
                let accepted = c.verify_cert()?;
                Ok((accepted, c.error().error_string()))
            })
            .map_err(tool)?;
        debug!(path = %cert_path.display(), accepted, reason, "chain verified with CRL");
        Ok(accepted)
    }

    pub fn revoked_count(&self) -> Result<usize> {
        let crl = self.load_crl("read-crl")?;
        Ok(crl.get_revoked().map_or(0, |revoked| revoked.len()))
    }

    fn load_crl(&self, step: &str) -> Result<X509Crl> {
        X509Crl::from_pem(&self.store.read(&self.store.crl())?)
            .map_err(|e| ProvisionError::tool(step, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::CertificateAuthority;
    use crate::configs::AppConfig;
    use crate::issuer::NativeIssuer;
    use crate::pki_generator::CertificateRole;
    use std::fs;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (IdentityStore, NativeIssuer) {
        let store = IdentityStore::new(dir.path());
        let issuer = NativeIssuer::from_config(&AppConfig::from_toml("").unwrap());
        let ca = CertificateAuthority::new(&store, &issuer);
        ca.initialize_pki().unwrap();
        ca.build_authority().unwrap();
        (store, issuer)
    }

    #[test]
    fn test_requires_authority() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        let issuer = NativeIssuer::from_config(&AppConfig::from_toml("").unwrap());
        let revocation = RevocationManager::new(&store, &issuer);
        assert!(matches!(
            revocation.generate_crl(),
            Err(ProvisionError::Precondition { .. })
        ));
    }

    #[test]
    fn test_empty_crl_validates_against_authority() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let revocation = RevocationManager::new(&store, &issuer);

        assert_eq!(revocation.generate_crl().unwrap(), ArtifactOutcome::Created);
        assert!(revocation.verify_crl().unwrap());
        assert_eq!(revocation.revoked_count().unwrap(), 0);

        let before = fs::read(store.crl()).unwrap();
        assert_eq!(revocation.generate_crl().unwrap(), ArtifactOutcome::Existing);
        assert_eq!(fs::read(store.crl()).unwrap(), before);
    }

    #[test]
    fn test_refresh_supersedes_previous_list() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let revocation = RevocationManager::new(&store, &issuer);
        revocation.generate_crl().unwrap();

        issuer.issue_cert(&store, "alice", CertificateRole::Client).unwrap();
        issuer.revoke_cert(&store, "alice").unwrap();
        revocation.refresh_crl().unwrap();

        assert!(revocation.verify_crl().unwrap());
        assert_eq!(revocation.revoked_count().unwrap(), 1);
    }

    #[test]
    fn test_crl_applies_to_chain_verification() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let revocation = RevocationManager::new(&store, &issuer);
        issuer.issue_cert(&store, "alice", CertificateRole::Client).unwrap();
        issuer.issue_cert(&store, "bob", CertificateRole::Client).unwrap();
        revocation.generate_crl().unwrap();

        assert!(revocation.check_certificate(&store.issued_cert("alice")).unwrap());

        let alice_cert = dir.path().join("alice-before-revocation.crt");
        fs::copy(store.issued_cert("alice"), &alice_cert).unwrap();
        issuer.revoke_cert(&store, "alice").unwrap();
        revocation.refresh_crl().unwrap();

        assert!(!revocation.check_certificate(&alice_cert).unwrap());
        assert!(revocation.check_certificate(&store.issued_cert("bob")).unwrap());
    }

    #[test]
    fn test_chain_check_needs_a_crl() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let revocation = RevocationManager::new(&store, &issuer);
        issuer.issue_cert(&store, "alice", CertificateRole::Client).unwrap();

        assert!(matches!(
            revocation.check_certificate(&store.issued_cert("alice")),
            Err(ProvisionError::MissingExpectedArtifact { .. })
        ));
    }
}
