//! In-process issuance with OpenSSL.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::time::{SystemTime, UNIX_EPOCH};

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::ExposeSecret;
use tracing::info;
use zeroize::{Zeroize, Zeroizing};

use super::Issuer;
use crate::configs::AppConfig;
use crate::crl::{build_crl_pem, RevocationLedger};
use crate::error::{ProvisionError, Result};
use crate::identity_store::{IdentityStore, PRIVATE_MODE, PUBLIC_MODE};
use crate::pki_generator::{self, CertificateData, CertificateRole};

const AUTH_KEY_BYTES: usize = 256;
const AUTH_KEY_LINE_CHARS: usize = 32;

#[derive(Debug, Clone)]
pub struct NativeIssuer {
    authority: CertificateData,
    key_bits: u32,
    dh_bits: u32,
    cert_validity_days: u32,
    crl_validity_days: u32,
}

impl NativeIssuer {
    pub fn from_config(config: &AppConfig) -> Self {
        let defaults = &config.authority;
        Self {
            authority: CertificateData {
                subject_common_name: defaults.common_name.clone(),
                organization: defaults.organization.clone(),
                organizational_unit: defaults.organizational_unit.clone(),
                locality: defaults.locality.clone(),
                state: defaults.state.clone(),
                country: defaults.country.clone(),
                validity_days: config.issuer.ca_validity_days,
            },
            key_bits: config.issuer.key_size,
            dh_bits: config.issuer.dh_bits,
            cert_validity_days: config.issuer.cert_validity_days,
            crl_validity_days: config.issuer.crl_validity_days,
        }
    }

    fn load_authority(&self, store: &IdentityStore, step: &str) -> Result<(PKey<Private>, X509)> {
        let key_pem = store.read(&store.ca_key())?;
        let cert_pem = store.read(&store.ca_cert())?;
        let key = PKey::private_key_from_pem(&key_pem).map_err(|e| ProvisionError::tool(step, e))?;
        let cert = X509::from_pem(&cert_pem).map_err(|e| ProvisionError::tool(step, e))?;
        Ok((key, cert))
    }

    fn load_ledger(&self, store: &IdentityStore, step: &str) -> Result<RevocationLedger> {
        let path = store.revocation_ledger();
        if store.should_create(&path)? {
            return Ok(RevocationLedger::default());
        }
        RevocationLedger::from_json(&store.read(&path)?)
            .map_err(|e| ProvisionError::tool(step, format!("{e:#}")))
    }

    fn save_ledger(&self, store: &IdentityStore, ledger: &RevocationLedger, step: &str) -> Result<()> {
        let json = ledger
            .to_json()
            .map_err(|e| ProvisionError::tool(step, format!("{e:#}")))?;
        store.write_atomic(&store.revocation_ledger(), &json, PUBLIC_MODE)
    }
}

impl Issuer for NativeIssuer {
    fn backend(&self) -> &'static str {
        "native"
    }

    fn init_pki(&self, store: &IdentityStore) -> Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(0o700);
        for dir in [store.issued_dir(), store.private_dir(), store.pki_dir()] {
            builder
                .create(&dir)
                .map_err(|e| ProvisionError::storage(&dir, e))?;
        }
        Ok(())
    }

    fn build_ca(&self, store: &IdentityStore) -> Result<()> {
        let step = "build-ca";
        let key = pki_generator::generate_private_key(self.key_bits)
            .map_err(|e| ProvisionError::tool(step, format!("{e:#}")))?;
        let cert = pki_generator::build_authority(&self.authority, &key)
            .map_err(|e| ProvisionError::tool(step, format!("{e:#}")))?;

        // Key first: a present certificate implies a present key
        let key_pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| ProvisionError::tool(step, e))?;
        store.write_atomic(&store.ca_key(), &key_pem, PRIVATE_MODE)?;
        let cert_pem = cert.to_pem().map_err(|e| ProvisionError::tool(step, e))?;
        store.write_atomic(&store.ca_cert(), &cert_pem, PUBLIC_MODE)?;
        info!(common_name = %self.authority.subject_common_name, "authority built");
        Ok(())
    }

    fn gen_dh(&self, store: &IdentityStore) -> Result<()> {
        info!(bits = self.dh_bits, "generating DH parameters, this may take a while");
        let pem = pki_generator::generate_dh_params(self.dh_bits)
            .map_err(|e| ProvisionError::tool("gen-dh", format!("{e:#}")))?;
        store.write_atomic(&store.dh_params(), &pem, PUBLIC_MODE)
    }

    fn issue_cert(
        &self,
        store: &IdentityStore,
        common_name: &str,
        role: CertificateRole,
    ) -> Result<()> {
        let step = format!("build-{}-full {common_name}", role.as_str());
        let (ca_key, ca_cert) = self.load_authority(store, &step)?;
        let data = CertificateData::leaf(common_name, self.cert_validity_days);
        let (key, cert) = pki_generator::issue_leaf(&data, role, self.key_bits, &ca_key, &ca_cert)
            .map_err(|e| ProvisionError::tool(&step, format!("{e:#}")))?;

        let key_pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| ProvisionError::tool(&step, e))?;
        store.write_atomic(&store.private_key(common_name), &key_pem, PRIVATE_MODE)?;
        let cert_pem = cert.to_pem().map_err(|e| ProvisionError::tool(&step, e))?;
        store.write_atomic(&store.issued_cert(common_name), &cert_pem, PUBLIC_MODE)
    }

    fn revoke_cert(&self, store: &IdentityStore, common_name: &str) -> Result<()> {
        let step = format!("revoke {common_name}");
        let cert_path = store.issued_cert(common_name);
        let cert = X509::from_pem(&store.read(&cert_path)?)
            .map_err(|e| ProvisionError::tool(&step, e))?;
        let serial = cert
            .serial_number()
            .to_bn()
            .map_err(|e| ProvisionError::tool(&step, e))?;
        let serial_hex = hex::encode(serial.to_vec());

        let revoked_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let mut ledger = self.load_ledger(store, &step)?;
        ledger.revoke(common_name, &serial_hex, revoked_at);
        self.save_ledger(store, &ledger, &step)?;

        // Retire the files under their serial so the name can be issued again later
        let moves = [
            (cert_path, store.revoked_cert(&serial_hex)),
            (store.private_key(common_name), store.revoked_key(&serial_hex)),
        ];
        for (from, to) in moves {
            if store.should_create(&from)? {
                continue;
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| ProvisionError::storage(parent, e))?;
            }
            fs::rename(&from, &to).map_err(|e| ProvisionError::storage(&from, e))?;
        }
        info!(client = common_name, serial = %serial_hex, "certificate revoked");
        Ok(())
    }

    fn gen_crl(&self, store: &IdentityStore) -> Result<()> {
        let step = "gen-crl";
        let mut ledger = self.load_ledger(store, step)?;
        ledger.crl_number += 1;

        let ca_cert = store.read_secret(&store.ca_cert())?;
        let ca_key = store.read_secret(&store.ca_key())?;
        let pem = build_crl_pem(
            ca_cert.expose_secret(),
            ca_key.expose_secret(),
            &ledger,
            self.crl_validity_days,
        )
        .map_err(|e| ProvisionError::tool(step, format!("{e:#}")))?;

        store.write_atomic(&store.crl(), pem.as_bytes(), PUBLIC_MODE)?;
        self.save_ledger(store, &ledger, step)
    }

    fn gen_auth_key(&self, store: &IdentityStore) -> Result<()> {
        let mut secret = [0u8; AUTH_KEY_BYTES];
        openssl::rand::rand_bytes(&mut secret)
            .map_err(|e| ProvisionError::tool("gen-auth-key", e))?;
        let document = format_static_key(&secret);
        secret.zeroize();
        store.write_atomic(&store.auth_key(), document.as_bytes(), PRIVATE_MODE)
    }
}

/// OpenVPN "Static key V1" framing: 16 lines of 32 hex characters.
fn format_static_key(secret: &[u8]) -> Zeroizing<String> {
    let hex = Zeroizing::new(hex::encode(secret));
    let mut out = Zeroizing::new(String::with_capacity(hex.len() + 160));
    out.push_str("#\n# 2048 bit OpenVPN static key\n#\n-----BEGIN OpenVPN Static key V1-----\n");
    for line in hex.as_bytes().chunks(AUTH_KEY_LINE_CHARS) {
        // hex output is ASCII
        out.push_str(std::str::from_utf8(line).unwrap_or_default());
        out.push('\n');
    }
    out.push_str("-----END OpenVPN Static key V1-----\n");
    out
}
