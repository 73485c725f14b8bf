//! VPN PKI - Idempotent PKI Provisioning and Bundling for a VPN Fleet
//!
//! Provisions the identity material for one VPN server and a roster of clients, and
//! assembles the configuration documents that use it: the server configuration and
//! one self-contained bundle per client.
//!
//! # Overview
//!
//! Every identity artifact is created at most once. Before each generation call the
//! [`identity_store::IdentityStore`] is asked whether the artifact already exists, so
//! a repeated run with an unchanged roster rewrites nothing:
//!
//! ```text
//! Authority (ca.crt, private/ca.key)
//!   ├── Server identity (dh.pem, issued/server.crt, private/server.key, ta.key)
//!   ├── Revocation list (crl.pem)
//!   └── Client identities (issued/<name>.crt, private/<name>.key), one per roster entry
//!         └── distributed copies -> bundles -> exported <name>.<ext>
//! ```
//!
//! # Features
//!
//! - **Idempotent Creation**: one existence check guards every generation call
//! - **Atomic Writes**: artifacts are written to a temporary file and renamed into place
//! - **Explicit Ordering**: a stage scheduler refuses to run a stage before its prerequisites
//! - **Isolated Clients**: one client's failure is reported, never fatal to the others
//! - **Two Issuers**: in-process OpenSSL, or the `easyrsa` script
//! - **Revocation**: retire a client and publish a fresh CRL
//!
//! # Quick Start
//!
//! ```bash
//! cat > vpn-pki.toml <<'EOF'
//! clients = ["alice", "bob"]
//!
//! [network]
//! public_host = "vpn.example.com"
//! EOF
//!
//! vpn-pki provision
//! vpn-pki status
//! vpn-pki revoke bob
//! ```
//!
//! # Library Usage
//!
//! ```no_run
//! use vpn_pki::configs::AppConfig;
//! use vpn_pki::pipeline::Provisioner;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_file("vpn-pki.toml")?;
//!     let roster = config.roster()?;
//!     let provisioner = Provisioner::from_config(config);
//!
//!     let report = provisioner.provision(&roster)?;
//!     for name in report.failed_clients() {
//!         eprintln!("{name} was not provisioned");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`identity_store`]: store layout, existence checks, atomic writes, read-back
//! - [`issuer`]: the issuance capability and its two backends
//! - [`authority`]: PKI working area and Authority
//! - [`server_identity`]: DH parameters, server certificate, auth key
//! - [`client_identity`]: per-client issuance and retirement
//! - [`revocation`]: CRL generation, refresh and verification
//! - [`distributor`]: role-scoped copies with per-role file modes
//! - [`bundle`]: server configuration and client bundles
//! - [`exporter`]: client bundles to the operator's output directory
//! - [`pipeline`]: stages, scheduler, provisioning report
//!
//! # Error Handling
//!
//! Engine operations return [`error::Result`], whose [`error::ProvisionError`]
//! separates tool failures, artifacts missing after creation, storage access
//! failures and ordering violations. Configuration loading uses `anyhow`.

pub mod authority;
pub mod bundle;
pub mod client_identity;
pub mod configs;
pub mod crl;
pub mod distributor;
pub mod error;
pub mod exporter;
pub mod identity_store;
pub mod issuer;
pub mod pipeline;
pub mod pki_generator;
pub mod revocation;
pub mod roster;
pub mod server_identity;
pub mod templates;

pub use error::{ProvisionError, Result};
pub use pipeline::{ProvisionReport, Provisioner};
