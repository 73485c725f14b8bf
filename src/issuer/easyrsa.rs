//! Issuance by driving the `easyrsa` script and `openvpn --genkey`.
//!
//! easy-rsa manages `pki/` itself (including its own revocation index), so this
//! backend only translates calls into batch-mode invocations and turns a non-zero
//! exit into [`ProvisionError::ToolInvocation`].

use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use super::Issuer;
use crate::configs::AppConfig;
use crate::error::{ProvisionError, Result};
use crate::identity_store::IdentityStore;
use crate::pki_generator::CertificateRole;

#[derive(Debug, Clone)]
pub struct EasyRsaIssuer {
    easyrsa: PathBuf,
    openvpn: PathBuf,
    ca_common_name: String,
    key_size: u32,
    dh_bits: u32,
    ca_validity_days: u32,
    cert_validity_days: u32,
    crl_validity_days: u32,
}

impl EasyRsaIssuer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            easyrsa: config.issuer.easyrsa_path.clone(),
            openvpn: config.issuer.openvpn_path.clone(),
            ca_common_name: config.authority.common_name.clone(),
            key_size: config.issuer.key_size,
            dh_bits: config.issuer.dh_bits,
            ca_validity_days: config.issuer.ca_validity_days,
            cert_validity_days: config.issuer.cert_validity_days,
            crl_validity_days: config.issuer.crl_validity_days,
        }
    }

    fn easyrsa<I, S>(&self, store: &IdentityStore, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.easyrsa);
        command
            .current_dir(store.root())
            .env("EASYRSA_PKI", store.pki_dir())
            .env("EASYRSA_BATCH", "1")
            .env("EASYRSA_KEY_SIZE", self.key_size.to_string())
            .env("EASYRSA_CA_EXPIRE", self.ca_validity_days.to_string())
            .env("EASYRSA_CERT_EXPIRE", self.cert_validity_days.to_string())
            .env("EASYRSA_CRL_DAYS", self.crl_validity_days.to_string())
            .arg("--batch")
            .args(args);
        command
    }

    fn run(&self, step: &str, mut command: Command) -> Result<()> {
        debug!(step, ?command, "invoking issuance tool");
        let output = command.output().map_err(|e| {
            ProvisionError::tool(
                step,
                format!("could not start {}: {e}", command.get_program().to_string_lossy()),
            )
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::tool(
                step,
                format!("{} ({})", output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

impl Issuer for EasyRsaIssuer {
    fn backend(&self) -> &'static str {
        "easyrsa"
    }

    fn init_pki(&self, store: &IdentityStore) -> Result<()> {
        fs::create_dir_all(store.root()).map_err(|e| ProvisionError::storage(store.root(), e))?;
        self.run("init-pki", self.easyrsa(store, ["init-pki"]))
    }

    fn build_ca(&self, store: &IdentityStore) -> Result<()> {
        let mut command = self.easyrsa(store, ["build-ca", "nopass"]);
        command.env("EASYRSA_REQ_CN", &self.ca_common_name);
        self.run("build-ca", command)
    }

    fn gen_dh(&self, store: &IdentityStore) -> Result<()> {
        let mut command = self.easyrsa(store, ["gen-dh"]);
        command.env("EASYRSA_KEY_SIZE", self.dh_bits.to_string());
        self.run("gen-dh", command)
    }

    fn issue_cert(
        &self,
        store: &IdentityStore,
        common_name: &str,
        role: CertificateRole,
    ) -> Result<()> {
        let subcommand = match role {
            CertificateRole::Server => "build-server-full",
            CertificateRole::Client => "build-client-full",
        };
        self.run(
            &format!("{subcommand} {common_name}"),
            self.easyrsa(store, [subcommand, common_name, "nopass"]),
        )
    }

    fn revoke_cert(&self, store: &IdentityStore, common_name: &str) -> Result<()> {
        self.run(
            &format!("revoke {common_name}"),
            self.easyrsa(store, ["revoke", common_name]),
        )
    }

    fn gen_crl(&self, store: &IdentityStore) -> Result<()> {
        self.run("gen-crl", self.easyrsa(store, ["gen-crl"]))
    }

    fn gen_auth_key(&self, store: &IdentityStore) -> Result<()> {
        let target = store.auth_key();
        let staging = target.with_extension("key.tmp");
        let mut command = Command::new(&self.openvpn);
        command.arg("--genkey").arg("secret").arg(&staging);
        self.run("gen-auth-key", command)?;
        fs::rename(&staging, &target).map_err(|e| ProvisionError::storage(&staging, e))
    }
}
