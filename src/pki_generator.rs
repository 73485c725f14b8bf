//! X.509 material generation with OpenSSL.
//!
//! Produces the three kinds of certificate the fleet needs:
//!
//! ```text
//! Authority (self-signed, CA=true, keyCertSign + cRLSign)
//!   ├── server   (CA=false, serverAuth)
//!   └── <client> (CA=false, clientAuth)
//! ```
//!
//! Keys are RSA with no passphrase; provisioning runs unattended.

use anyhow::{anyhow, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::dh::Dh;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameRef, X509Ref, X509};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const DH_GENERATOR: u32 = 2;

/// Which end of the tunnel a leaf certificate identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateRole {
    Server,
    Client,
}

impl CertificateRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateRole::Server => "server",
            CertificateRole::Client => "client",
        }
    }
}

/// Subject fields and lifetime for a certificate.
#[derive(Debug, Clone)]
pub struct CertificateData {
    pub subject_common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub locality: String,
    pub state: String,
    pub country: String,
    pub validity_days: u32,
}

impl CertificateData {
    /// Leaf subjects carry only a common name, like easy-rsa's default `cn_only` mode.
    pub fn leaf(common_name: &str, validity_days: u32) -> Self {
        Self {
            subject_common_name: common_name.to_string(),
            organization: String::new(),
            organizational_unit: String::new(),
            locality: String::new(),
            state: String::new(),
            country: String::new(),
            validity_days,
        }
    }

    fn subject_name(&self) -> Result<X509Name> {
        let mut name_builder =
            X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, &self.subject_common_name)
            .map_err(|e| anyhow!("Failed to set CN: {}", e))?;

        let optional = [
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit),
            (Nid::LOCALITYNAME, &self.locality),
            (Nid::STATEORPROVINCENAME, &self.state),
            (Nid::COUNTRYNAME, &self.country),
        ];
        for (nid, value) in optional {
            if value.is_empty() {
                continue;
            }
            name_builder
                .append_entry_by_nid(nid, value)
                .map_err(|e| anyhow!("Failed to set {}: {}", nid.short_name().unwrap_or("?"), e))?;
        }
        Ok(name_builder.build())
    }
}

pub fn generate_private_key(bits: u32) -> Result<PKey<Private>> {
    let rsa = Rsa::generate(bits).map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
    PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
}

/// Build the self-signed Authority certificate for `key`.
pub fn build_authority(data: &CertificateData, key: &PKey<Private>) -> Result<X509> {
    let name = data.subject_name()?;
    let mut builder = base_builder(data, &name, &name, key)?;

    let bc = BasicConstraints::new()
        .critical()
        .ca()
        .build()
        .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
    builder
        .append_extension(bc)
        .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

    let ku = KeyUsage::new()
        .critical()
        .key_cert_sign()
        .crl_sign()
        .build()
        .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
    builder
        .append_extension(ku)
        .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
    builder
        .append_extension(ski)
        .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;

    builder
        .sign(key, MessageDigest::sha256())
        .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
    Ok(builder.build())
}

/// Generate a key pair and a certificate for it signed by the Authority.
pub fn issue_leaf(
    data: &CertificateData,
    role: CertificateRole,
    key_bits: u32,
    ca_key: &PKey<Private>,
    ca_cert: &X509Ref,
) -> Result<(PKey<Private>, X509)> {
    let private_key = generate_private_key(key_bits)?;
    let name = data.subject_name()?;
    let mut builder = base_builder(data, &name, ca_cert.subject_name(), &private_key)?;

    let bc = BasicConstraints::new()
        .critical()
        .build()
        .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
    builder
        .append_extension(bc)
        .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

    let (ku, eku) = match role {
        CertificateRole::Server => (
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build(),
            ExtendedKeyUsage::new().server_auth().build(),
        ),
        CertificateRole::Client => (
            KeyUsage::new().critical().digital_signature().build(),
            ExtendedKeyUsage::new().client_auth().build(),
        ),
    };
    builder
        .append_extension(ku.map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?)
        .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;
    builder
        .append_extension(eku.map_err(|e| anyhow!("Failed to build ExtendedKeyUsage: {}", e))?)
        .map_err(|e| anyhow!("Failed to add ExtendedKeyUsage: {}", e))?;

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(Some(ca_cert), None))
        .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
    builder
        .append_extension(ski)
        .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(ca_cert), None))
        .map_err(|e| anyhow!("Failed to build AuthorityKeyIdentifier: {}", e))?;
    builder
        .append_extension(aki)
        .map_err(|e| anyhow!("Failed to add AuthorityKeyIdentifier: {}", e))?;

    // Sign with the Authority's private key
    builder
        .sign(ca_key, MessageDigest::sha256())
        .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
    Ok((private_key, builder.build()))
}

/// Diffie-Hellman parameters in PEM form.
pub fn generate_dh_params(bits: u32) -> Result<Vec<u8>> {
    let dh = Dh::generate_params(bits, DH_GENERATOR)
        .map_err(|e| anyhow!("Failed to generate DH parameters: {}", e))?;
    dh.params_to_pem()
        .map_err(|e| anyhow!("Failed to encode DH parameters: {}", e))
}

fn base_builder(
    data: &CertificateData,
    subject: &X509NameRef,
    issuer: &X509NameRef,
    public_key: &PKey<Private>,
) -> Result<X509Builder> {
    let mut builder = X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
    builder
        .set_version(X509_VERSION_3)
        .map_err(|e| anyhow!("Failed to set version: {}", e))?;

    // Generate random 128-bit (16-byte) serial number
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial_asn1 = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial_asn1)?;

    builder
        .set_subject_name(subject)
        .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
    builder
        .set_issuer_name(issuer)
        .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

    let not_before =
        Asn1Time::days_from_now(0).map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
    builder
        .set_not_before(&not_before)
        .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
    let not_after = Asn1Time::days_from_now(data.validity_days)
        .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
    builder
        .set_not_after(&not_after)
        .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

    builder
        .set_pubkey(public_key)
        .map_err(|e| anyhow!("Failed to set public key: {}", e))?;
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> (PKey<Private>, X509) {
        let data = CertificateData {
            subject_common_name: "Test CA".to_string(),
            organization: "Test Org".to_string(),
            organizational_unit: String::new(),
            locality: String::new(),
            state: String::new(),
            country: "US".to_string(),
            validity_days: 30,
        };
        let key = generate_private_key(2048).unwrap();
        let cert = build_authority(&data, &key).unwrap();
        (key, cert)
    }

    #[test]
    fn test_authority_is_self_signed() {
        let (key, cert) = authority();
        assert!(cert.verify(&key).unwrap());
        let cn = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "Test CA");
    }

    #[test]
    fn test_leaf_signed_by_authority() {
        let (ca_key, ca_cert) = authority();
        let data = CertificateData::leaf("alice", 30);
        let (key, cert) =
            issue_leaf(&data, CertificateRole::Client, 2048, &ca_key, &ca_cert).unwrap();

        assert!(cert.verify(&ca_key).unwrap());
        assert!(!cert.verify(&key).unwrap());
        assert_eq!(
            cert.issuer_name().to_der().unwrap(),
            ca_cert.subject_name().to_der().unwrap()
        );
        assert!(cert.public_key().unwrap().public_eq(&key));
    }

    #[test]
    fn test_serials_differ() {
        let (ca_key, ca_cert) = authority();
        let data = CertificateData::leaf("server", 30);
        let (_, a) = issue_leaf(&data, CertificateRole::Server, 2048, &ca_key, &ca_cert).unwrap();
        let (_, b) = issue_leaf(&data, CertificateRole::Server, 2048, &ca_key, &ca_cert).unwrap();
        assert_ne!(
            a.serial_number().to_bn().unwrap(),
            b.serial_number().to_bn().unwrap()
        );
    }

    #[test]
    fn test_dh_params_pem() {
        let pem = generate_dh_params(512).unwrap();
        let text = String::from_utf8(pem).unwrap();
        assert!(text.contains("BEGIN DH PARAMETERS"));
    }
}
