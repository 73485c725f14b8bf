//! Issuance capability.
//!
//! An [`Issuer`] produces PKI material directly into the [`IdentityStore`] layout.
//! It performs no existence checks of its own; callers gate every call through the
//! store's Existence Oracle.

mod easyrsa;
mod native;

pub use easyrsa::EasyRsaIssuer;
pub use native::NativeIssuer;

use crate::configs::{AppConfig, IssuerBackend};
use crate::error::Result;
use crate::identity_store::IdentityStore;
use crate::pki_generator::CertificateRole;

pub trait Issuer {
    fn backend(&self) -> &'static str;

    /// Create the PKI working area.
    fn init_pki(&self, store: &IdentityStore) -> Result<()>;

    /// Create the Authority key and self-signed certificate, without a passphrase.
    fn build_ca(&self, store: &IdentityStore) -> Result<()>;

    fn gen_dh(&self, store: &IdentityStore) -> Result<()>;

    /// Create `common_name`'s key and certificate, signed by the Authority.
    fn issue_cert(&self, store: &IdentityStore, common_name: &str, role: CertificateRole)
        -> Result<()>;

    /// Record `common_name`'s certificate as revoked and move it out of `issued/`.
    fn revoke_cert(&self, store: &IdentityStore, common_name: &str) -> Result<()>;

    /// Write a CRL covering every revocation recorded so far.
    fn gen_crl(&self, store: &IdentityStore) -> Result<()>;

    /// Create the shared symmetric key used for the extra handshake authentication layer.
    fn gen_auth_key(&self, store: &IdentityStore) -> Result<()>;
}

pub fn from_config(config: &AppConfig) -> Box<dyn Issuer> {
    match config.issuer.backend {
        IssuerBackend::Native => Box::new(NativeIssuer::from_config(config)),
        IssuerBackend::EasyRsa => Box::new(EasyRsaIssuer::from_config(config)),
    }
}
