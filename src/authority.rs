//! Certificate Authority Manager
//!
//! Owns the PKI working area and the Authority (root key plus self-signed
//! certificate). Both are created at most once; every other provisioner asks
//! [`require_authority`] before it touches the issuer.

use tracing::info;

use crate::error::{ProvisionError, Result};
use crate::identity_store::{ArtifactOutcome, IdentityStore};
use crate::issuer::Issuer;
use crate::pipeline::Stage;

pub struct CertificateAuthority<'a> {
    store: &'a IdentityStore,
    issuer: &'a dyn Issuer,
}

impl<'a> CertificateAuthority<'a> {
    pub fn new(store: &'a IdentityStore, issuer: &'a dyn Issuer) -> Self {
        Self { store, issuer }
    }

    /// InitializePKI: create the working area once.
    pub fn initialize_pki(&self) -> Result<ArtifactOutcome> {
        self.store
            .create_if_absent("init-pki", &self.store.pki_dir(), || {
                self.issuer.init_pki(self.store)
            })
    }

    /// BuildAuthority: create the root key and certificate once, without a passphrase.
    pub fn build_authority(&self) -> Result<ArtifactOutcome> {
        if self.store.should_create(&self.store.pki_dir())? {
            return Err(ProvisionError::Precondition {
                stage: Stage::Authority,
                prerequisite: Stage::InitPki,
            });
        }
        let outcome = self
            .store
            .create_if_absent("build-ca", &self.store.ca_cert(), || {
                self.issuer.build_ca(self.store)
            })?;
        self.store.require("build-ca", &self.store.ca_key())?;
        if outcome == ArtifactOutcome::Created {
            info!(backend = self.issuer.backend(), path = %self.store.ca_cert().display(), "authority created");
        }
        Ok(outcome)
    }

    pub fn certificate_pem(&self) -> Result<Vec<u8>> {
        require_authority(self.store, Stage::Authority)?;
        self.store.read(&self.store.ca_cert())
    }
}

/// Fails with a precondition error naming `stage` unless the Authority's
/// certificate and key are both in the store.
pub fn require_authority(store: &IdentityStore, stage: Stage) -> Result<()> {
    for path in [store.ca_cert(), store.ca_key()] {
        if store.should_create(&path)? {
            return Err(ProvisionError::Precondition {
                stage,
                prerequisite: Stage::Authority,
            });
        }
    }
    Ok(())
}
