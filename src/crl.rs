//! Revocation ledger and X.509 v2 CRL encoding for the native backend.
//!
//! The ledger (`pki/revoked.json`) is the bookkeeping the Authority keeps about
//! revoked serials; every CRL is rebuilt from it in full.

use anyhow::{anyhow, Context, Result};
use rcgen::{
    CertificateParams, CertificateRevocationListParams, KeyIdMethod, KeyPair, RevocationReason,
    RevokedCertParams, SerialNumber,
};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedEntry {
    pub common_name: String,
    /// Certificate serial, big-endian hex.
    pub serial: String,
    /// Unix seconds.
    pub revoked_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationLedger {
    /// Number of the most recently issued CRL.
    pub crl_number: u64,
    #[serde(default)]
    pub entries: Vec<RevokedEntry>,
}

impl RevocationLedger {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("Failed to parse revocation ledger")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("Failed to serialize revocation ledger")
    }

    pub fn is_revoked(&self, serial: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.serial.eq_ignore_ascii_case(serial))
    }

    /// Returns `false` if the serial was already recorded.
    pub fn revoke(&mut self, common_name: &str, serial: &str, revoked_at: i64) -> bool {
        if self.is_revoked(serial) {
            return false;
        }
        self.entries.push(RevokedEntry {
            common_name: common_name.to_string(),
            serial: serial.to_lowercase(),
            revoked_at,
        });
        true
    }
}

/// Sign a CRL listing every ledger entry, numbered `crl_number`.
pub fn build_crl_pem(
    ca_cert_pem: &str,
    ca_key_pem: &str,
    ledger: &RevocationLedger,
    validity_days: u32,
) -> Result<String> {
    let ca_key = KeyPair::from_pem(ca_key_pem).map_err(|e| anyhow!("Failed to load CA key: {}", e))?;
    let key_identifier_method = authority_key_identifier(ca_cert_pem)?;
    let mut ca_params = CertificateParams::from_ca_cert_pem(ca_cert_pem)
        .map_err(|e| anyhow!("Failed to parse CA certificate: {}", e))?;
    ca_params.key_identifier_method = key_identifier_method.clone();
    // rcgen needs its own view of the issuer; only the name and key usages are used
    let issuer = ca_params
        .self_signed(&ca_key)
        .map_err(|e| anyhow!("Failed to load CA as CRL issuer: {}", e))?;

    let revoked_certs = ledger
        .entries
        .iter()
        .map(|entry| {
            let serial = hex::decode(&entry.serial)
                .with_context(|| format!("Bad serial in ledger for {}", entry.common_name))?;
            let revocation_time = OffsetDateTime::from_unix_timestamp(entry.revoked_at)
                .with_context(|| format!("Bad revocation time for {}", entry.common_name))?;
            Ok(RevokedCertParams {
                serial_number: SerialNumber::from_slice(&serial),
                revocation_time,
                reason_code: Some(RevocationReason::CessationOfOperation),
                invalidity_date: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let now = OffsetDateTime::now_utc();
    let params = CertificateRevocationListParams {
        this_update: now,
        next_update: now + Duration::days(i64::from(validity_days)),
        crl_number: SerialNumber::from(ledger.crl_number),
        issuing_distribution_point: None,
        revoked_certs,
        key_identifier_method,
    };
    let crl = params
        .signed_by(&issuer, &ca_key)
        .map_err(|e| anyhow!("Failed to sign CRL: {}", e))?;
    crl.pem().map_err(|e| anyhow!("Failed to encode CRL: {}", e))
}

/// The CRL's authority key identifier must equal the CA's subject key identifier,
/// or verifiers cannot match the list to its issuer.
fn authority_key_identifier(ca_cert_pem: &str) -> Result<KeyIdMethod> {
    let ca_cert = X509::from_pem(ca_cert_pem.as_bytes())
        .map_err(|e| anyhow!("Failed to parse CA certificate: {}", e))?;
    let ski = ca_cert
        .subject_key_id()
        .ok_or_else(|| anyhow!("CA certificate has no subject key identifier"))?;
    Ok(KeyIdMethod::PreSpecified(ski.as_slice().to_vec()))
}
