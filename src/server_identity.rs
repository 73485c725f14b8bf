//! Server Identity Provisioner
//!
//! Creates the material the VPN server process needs, once per deployment:
//!
//! - DH parameters (`pki/dh.pem`)
//! - the server certificate and key (`issued/server.crt`, `private/server.key`),
//!   signed by the Authority with the server role's key usages
//! - the shared handshake auth key (`pki/ta.key`), also inlined into every client
//!   bundle
//!
//! # Ordering
//!
//! Every operation requires a built Authority and fails with a precondition error
//! otherwise. Each artifact goes through the store's existence check, so a second
//! run leaves all three untouched.
//!
//! # Auth Key Check
//!
//! The auth key is read back after create-or-skip. A key that is still absent at
//! that point is reported as a missing artifact, not as a tool failure.

use std::io::ErrorKind;

use tracing::info;

use crate::authority::require_authority;
use crate::error::{ProvisionError, Result};
use crate::identity_store::{ArtifactOutcome, IdentityStore};
use crate::issuer::Issuer;
use crate::pipeline::Stage;
use crate::pki_generator::CertificateRole;

/// Common name, and store file stem, of the server identity.
pub const SERVER_COMMON_NAME: &str = "server";

pub struct ServerIdentityProvisioner<'a> {
    store: &'a IdentityStore,
    issuer: &'a dyn Issuer,
}

impl<'a> ServerIdentityProvisioner<'a> {
    pub fn new(store: &'a IdentityStore, issuer: &'a dyn Issuer) -> Self {
        Self { store, issuer }
    }

    pub fn generate_dh_params(&self) -> Result<ArtifactOutcome> {
        require_authority(self.store, Stage::DhParams)?;
        self.store
            .create_if_absent("gen-dh", &self.store.dh_params(), || {
                self.issuer.gen_dh(self.store)
            })
    }

    pub fn issue_server_certificate(&self) -> Result<ArtifactOutcome> {
        require_authority(self.store, Stage::ServerCertificate)?;
        let step = format!("build-server-full {SERVER_COMMON_NAME}");
        let cert = self.store.issued_cert(SERVER_COMMON_NAME);
        let outcome = self.store.create_if_absent(&step, &cert, || {
            self.issuer
                .issue_cert(self.store, SERVER_COMMON_NAME, CertificateRole::Server)
        })?;
        self.store
            .require(&step, &self.store.private_key(SERVER_COMMON_NAME))?;
        if outcome == ArtifactOutcome::Created {
            info!(path = %cert.display(), "server certificate issued");
        }
        Ok(outcome)
    }

    /// Creates the auth key if absent, then reads it back from the store. A key
    /// that cannot be found at that point is reported as missing, not as a
    /// generation failure.
    pub fn generate_auth_key(&self) -> Result<ArtifactOutcome> {
        require_authority(self.store, Stage::AuthKey)?;
        let step = "gen-auth-key";
        let path = self.store.auth_key();
        let outcome = self.store.create_if_absent(step, &path, || {
            self.issuer.gen_auth_key(self.store)
        })?;

        match self.store.read_secret(&path) {
            Ok(_) => Ok(outcome),
            Err(ProvisionError::StorageAccess { source, .. })
                if source.kind() == ErrorKind::NotFound =>
            {
                Err(ProvisionError::missing(step, path))
            }
            Err(e) => Err(e),
        }
    }
}
