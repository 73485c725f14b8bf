use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::roster::Roster;

pub const DEFAULT_CONFIG_PATH: &str = "vpn-pki.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub issuer: IssuerConfig,
    #[serde(default)]
    pub authority: AuthorityDefaults,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub bundles: BundleConfig,
    #[serde(default)]
    pub clients: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Paths {
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,
    #[serde(default = "default_users_dir")]
    pub users_dir: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            server_dir: default_server_dir(),
            users_dir: default_users_dir(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("/etc/openvpn/easy-rsa")
}

fn default_server_dir() -> PathBuf {
    PathBuf::from("/etc/openvpn/server")
}

fn default_users_dir() -> PathBuf {
    PathBuf::from("/etc/openvpn/users")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("bundles")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssuerBackend {
    Native,
    EasyRsa,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IssuerConfig {
    #[serde(default = "default_backend")]
    pub backend: IssuerBackend,
    #[serde(default = "default_easyrsa_path")]
    pub easyrsa_path: PathBuf,
    #[serde(default = "default_openvpn_path")]
    pub openvpn_path: PathBuf,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default = "default_dh_bits")]
    pub dh_bits: u32,
    #[serde(default = "default_ca_validity")]
    pub ca_validity_days: u32,
    #[serde(default = "default_cert_validity")]
    pub cert_validity_days: u32,
    #[serde(default = "default_crl_validity")]
    pub crl_validity_days: u32,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            easyrsa_path: default_easyrsa_path(),
            openvpn_path: default_openvpn_path(),
            key_size: default_key_size(),
            dh_bits: default_dh_bits(),
            ca_validity_days: default_ca_validity(),
            cert_validity_days: default_cert_validity(),
            crl_validity_days: default_crl_validity(),
        }
    }
}

fn default_backend() -> IssuerBackend {
    IssuerBackend::Native
}

fn default_easyrsa_path() -> PathBuf {
    PathBuf::from("/usr/share/easy-rsa/easyrsa")
}

fn default_openvpn_path() -> PathBuf {
    PathBuf::from("openvpn")
}

fn default_key_size() -> u32 {
    2048
}

fn default_dh_bits() -> u32 {
    2048
}

fn default_ca_validity() -> u32 {
    3650 // 10 years
}

fn default_cert_validity() -> u32 {
    825
}

fn default_crl_validity() -> u32 {
    180
}

/// Distinguished name of the Authority.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthorityDefaults {
    #[serde(default = "default_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_ca_org")]
    pub organization: String,
    #[serde(default = "default_ca_ou")]
    pub organizational_unit: String,
    #[serde(default = "default_ca_locality")]
    pub locality: String,
    #[serde(default = "default_ca_state")]
    pub state: String,
    #[serde(default = "default_ca_country")]
    pub country: String,
}

impl Default for AuthorityDefaults {
    fn default() -> Self {
        Self {
            common_name: default_ca_cn(),
            organization: default_ca_org(),
            organizational_unit: default_ca_ou(),
            locality: default_ca_locality(),
            state: default_ca_state(),
            country: default_ca_country(),
        }
    }
}

fn default_ca_cn() -> String {
    "VPN Fleet CA".to_string()
}

fn default_ca_org() -> String {
    "VPN Fleet".to_string()
}

fn default_ca_ou() -> String {
    "Operations".to_string()
}

fn default_ca_locality() -> String {
    "San Francisco".to_string()
}

fn default_ca_state() -> String {
    "CA".to_string()
}

fn default_ca_country() -> String {
    "US".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_public_host")]
    pub public_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_subnet")]
    pub subnet: String,
    #[serde(default = "default_netmask")]
    pub netmask: String,
    #[serde(default)]
    pub push_dns: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            public_host: default_public_host(),
            port: default_port(),
            proto: default_proto(),
            device: default_device(),
            subnet: default_subnet(),
            netmask: default_netmask(),
            push_dns: Vec::new(),
        }
    }
}

fn default_public_host() -> String {
    "vpn.example.com".to_string()
}

fn default_port() -> u16 {
    1194
}

fn default_proto() -> String {
    "udp".to_string()
}

fn default_device() -> String {
    "tun".to_string()
}

fn default_subnet() -> String {
    "10.8.0.0".to_string()
}

fn default_netmask() -> String {
    "255.255.255.0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BundleConfig {
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
        }
    }
}

fn default_extension() -> String {
    "ovpn".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(config_str).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.issuer.key_size < 2048 {
            bail!("issuer.key_size must be at least 2048, got {}", self.issuer.key_size);
        }
        if self.issuer.dh_bits < 512 {
            bail!("issuer.dh_bits must be at least 512, got {}", self.issuer.dh_bits);
        }
        if self.issuer.ca_validity_days == 0
            || self.issuer.cert_validity_days == 0
            || self.issuer.crl_validity_days == 0
        {
            bail!("issuer validity periods must be non-zero");
        }
        if self.bundles.extension.is_empty() || self.bundles.extension.contains('/') {
            bail!("bundles.extension {:?} is not a valid file extension", self.bundles.extension);
        }
        self.roster()?;
        Ok(())
    }

    pub fn roster(&self) -> Result<Roster> {
        Ok(Roster::new(self.clients.iter().cloned())?)
    }
}
