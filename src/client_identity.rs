//! Client Identity Provisioner
//!
//! Each roster entry is issued independently: a failure for one client is
//! returned alongside that client's name and never stops the others.

use tracing::{info, warn};

use crate::authority::require_authority;
use crate::error::{ProvisionError, Result};
use crate::identity_store::{ArtifactOutcome, IdentityStore};
use crate::issuer::Issuer;
use crate::pipeline::Stage;
use crate::pki_generator::CertificateRole;
use crate::revocation::RevocationManager;
use crate::roster::{validate_name, Roster};

pub struct ClientIdentityProvisioner<'a> {
    store: &'a IdentityStore,
    issuer: &'a dyn Issuer,
}

impl<'a> ClientIdentityProvisioner<'a> {
    pub fn new(store: &'a IdentityStore, issuer: &'a dyn Issuer) -> Self {
        Self { store, issuer }
    }

    pub fn issue_client_certificate(&self, name: &str) -> Result<ArtifactOutcome> {
        validate_name(name)?;
        require_authority(self.store, Stage::ClientIdentities)?;
        let step = format!("build-client-full {name}");
        let outcome = self
            .store
            .create_if_absent(&step, &self.store.issued_cert(name), || {
                self.issuer.issue_cert(self.store, name, CertificateRole::Client)
            })?;
        self.store.require(&step, &self.store.private_key(name))?;
        if outcome == ArtifactOutcome::Created {
            info!(client = name, "client certificate issued");
        }
        Ok(outcome)
    }

    /// Issue every roster entry, in roster order.
    pub fn issue_roster<'r>(&self, roster: &'r Roster) -> Vec<(&'r str, Result<ArtifactOutcome>)> {
        roster
            .iter()
            .map(|name| {
                let result = self.issue_client_certificate(name);
                if let Err(e) = &result {
                    warn!(client = name, error = %e, "client certificate not issued");
                }
                (name, result)
            })
            .collect()
    }

    /// Revoke `name`'s certificate and publish a CRL that lists it.
    ///
    /// The certificate and key leave `issued/` and `private/`, so a later run
    /// with `name` still on the roster issues a fresh identity.
    pub fn retire(&self, name: &str, revocation: &RevocationManager<'_>) -> Result<()> {
        validate_name(name)?;
        require_authority(self.store, Stage::RevocationList)?;
        let step = format!("revoke {name}");
        let cert = self.store.issued_cert(name);
        if self.store.should_create(&cert)? {
            return Err(ProvisionError::missing(step, cert));
        }
        self.issuer.revoke_cert(self.store, name)?;
        revocation.refresh_crl()?;
        info!(client = name, "client retired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::CertificateAuthority;
    use crate::configs::AppConfig;
    use crate::issuer::NativeIssuer;
    use std::fs;
    use tempfile::TempDir;

    /// Fails issuance for one particular name, delegating everything else.
    struct FailFor<'a> {
        inner: &'a NativeIssuer,
        name: &'static str,
    }

    impl Issuer for FailFor<'_> {
        fn backend(&self) -> &'static str {
            "fail-for"
        }
        fn init_pki(&self, store: &IdentityStore) -> Result<()> {
            self.inner.init_pki(store)
        }
        fn build_ca(&self, store: &IdentityStore) -> Result<()> {
            self.inner.build_ca(store)
        }
        fn gen_dh(&self, store: &IdentityStore) -> Result<()> {
            self.inner.gen_dh(store)
        }
        fn issue_cert(&self, store: &IdentityStore, cn: &str, role: CertificateRole) -> Result<()> {
            if cn == self.name {
                return Err(ProvisionError::tool(format!("build-client-full {cn}"), "exit status: 1"));
            }
            self.inner.issue_cert(store, cn, role)
        }
        fn revoke_cert(&self, store: &IdentityStore, cn: &str) -> Result<()> {
            self.inner.revoke_cert(store, cn)
        }
        fn gen_crl(&self, store: &IdentityStore) -> Result<()> {
            self.inner.gen_crl(store)
        }
        fn gen_auth_key(&self, store: &IdentityStore) -> Result<()> {
            self.inner.gen_auth_key(store)
        }
    }

    fn setup(dir: &TempDir) -> (IdentityStore, NativeIssuer) {
        let store = IdentityStore::new(dir.path());
        let issuer = NativeIssuer::from_config(&AppConfig::from_toml("").unwrap());
        let ca = CertificateAuthority::new(&store, &issuer);
        ca.initialize_pki().unwrap();
        ca.build_authority().unwrap();
        (store, issuer)
    }

    #[test]
    fn test_one_failure_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        let (store, native) = setup(&dir);
        let issuer = FailFor {
            inner: &native,
            name: "bob",
        };
        let clients = ClientIdentityProvisioner::new(&store, &issuer);
        let roster = Roster::new(["alice", "bob", "carol"]).unwrap();

        let results = clients.issue_roster(&roster);
        let names: Vec<&str> = results.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(ProvisionError::ToolInvocation { .. })));
        assert!(results[2].1.is_ok());
        assert!(store.issued_cert("carol").exists());
        assert!(!store.issued_cert("bob").exists());
    }

    #[test]
    fn test_issue_is_idempotent_per_client() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let clients = ClientIdentityProvisioner::new(&store, &issuer);

        assert_eq!(clients.issue_client_certificate("alice").unwrap(), ArtifactOutcome::Created);
        let key = fs::read(store.private_key("alice")).unwrap();
        assert_eq!(clients.issue_client_certificate("alice").unwrap(), ArtifactOutcome::Existing);
        assert_eq!(fs::read(store.private_key("alice")).unwrap(), key);
    }

    #[test]
    fn test_retire_revokes_only_that_client() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let clients = ClientIdentityProvisioner::new(&store, &issuer);
        let revocation = RevocationManager::new(&store, &issuer);
        clients.issue_client_certificate("alice").unwrap();
        clients.issue_client_certificate("bob").unwrap();
        revocation.generate_crl().unwrap();
        let bob_cert = fs::read(store.issued_cert("bob")).unwrap();

        clients.retire("alice", &revocation).unwrap();

        assert!(!store.issued_cert("alice").exists());
        assert_eq!(fs::read(store.issued_cert("bob")).unwrap(), bob_cert);
        assert_eq!(revocation.revoked_count().unwrap(), 1);
        assert!(revocation.verify_crl().unwrap());
    }

    #[test]
    fn test_retire_unknown_client_fails() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let clients = ClientIdentityProvisioner::new(&store, &issuer);
        let revocation = RevocationManager::new(&store, &issuer);
        assert!(matches!(
            clients.retire("nobody", &revocation),
            Err(ProvisionError::MissingExpectedArtifact { .. })
        ));
    }

    #[test]
    fn test_retire_refuses_names_outside_the_client_namespace() {
        let dir = TempDir::new().unwrap();
        let (store, issuer) = setup(&dir);
        let clients = ClientIdentityProvisioner::new(&store, &issuer);
        let revocation = RevocationManager::new(&store, &issuer);
        revocation.generate_crl().unwrap();
        let ca_cert = fs::read(store.ca_cert()).unwrap();

        for name in ["../ca", "server", "ca", ""] {
            assert!(
                matches!(
                    clients.retire(name, &revocation),
                    Err(ProvisionError::InvalidRoster(_))
                ),
                "{name:?} accepted"
            );
        }
        assert_eq!(fs::read(store.ca_cert()).unwrap(), ca_cert);
        assert_eq!(revocation.revoked_count().unwrap(), 0);
        assert!(matches!(
            clients.issue_client_certificate("../server"),
            Err(ProvisionError::InvalidRoster(_))
        ));
    }
}
