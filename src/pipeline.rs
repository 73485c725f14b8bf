//! Provisioning pipeline
//!
//! The stages form a dependency graph:
//!
//! ```text
//! init pki -> authority -> { dh params, server certificate, auth key,
//!                            revocation list, client identities }
//!          -> distribution -> bundles -> export
//! ```
//!
//! [`Scheduler`] refuses to run a stage before its prerequisites have completed.
//! Single-shot stages abort the run on failure. Roster-scoped work inside a stage
//! is isolated per client: a failed client is recorded in the report and skipped
//! by the later stages, while the rest of the roster carries on.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::authority::CertificateAuthority;
use crate::bundle::BundleComposer;
use crate::client_identity::ClientIdentityProvisioner;
use crate::configs::AppConfig;
use crate::distributor::{ArtifactDistributor, DestinationRole, FileRecord, Identity};
use crate::error::{ProvisionError, Result};
use crate::exporter::BundleExporter;
use crate::identity_store::{ArtifactOutcome, IdentityStore};
use crate::issuer::{self, Issuer};
use crate::revocation::RevocationManager;
use crate::roster::Roster;
use crate::server_identity::{ServerIdentityProvisioner, SERVER_COMMON_NAME};
use crate::templates::{OpenVpnRenderer, Renderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitPki,
    Authority,
    DhParams,
    ServerCertificate,
    AuthKey,
    RevocationList,
    ClientIdentities,
    Distribution,
    Bundles,
    Export,
}

impl Stage {
    pub fn prerequisites(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            InitPki => &[],
            Authority => &[InitPki],
            DhParams | ServerCertificate | AuthKey | RevocationList | ClientIdentities => {
                &[Authority]
            }
            Distribution => &[
                DhParams,
                ServerCertificate,
                AuthKey,
                RevocationList,
                ClientIdentities,
            ],
            Bundles => &[Distribution],
            Export => &[Bundles],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InitPki => "init pki",
            Stage::Authority => "authority",
            Stage::DhParams => "dh params",
            Stage::ServerCertificate => "server certificate",
            Stage::AuthKey => "auth key",
            Stage::RevocationList => "revocation list",
            Stage::ClientIdentities => "client identities",
            Stage::Distribution => "distribution",
            Stage::Bundles => "bundles",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    completed: BTreeSet<Stage>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    /// Run `work` as `stage`, provided every prerequisite has completed.
    pub fn run<T, F>(&mut self, stage: Stage, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(missing) = stage
            .prerequisites()
            .iter()
            .find(|p| !self.completed.contains(p))
        {
            return Err(ProvisionError::Precondition {
                stage,
                prerequisite: *missing,
            });
        }
        let span = info_span!("stage", %stage);
        let _enter = span.enter();
        let value = work()?;
        self.completed.insert(stage);
        Ok(value)
    }
}

/// Outcome of one identity artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub stage: Stage,
    pub artifact: String,
    pub path: PathBuf,
    pub outcome: ArtifactOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClientStatus {
    Provisioned { bundle: PathBuf },
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Default, Serialize)]
pub struct ProvisionReport {
    pub artifacts: Vec<ArtifactRecord>,
    pub files: Vec<FileRecord>,
    pub clients: BTreeMap<String, ClientStatus>,
}

impl ProvisionReport {
    fn artifact(
        &mut self,
        stage: Stage,
        artifact: impl Into<String>,
        path: PathBuf,
        outcome: ArtifactOutcome,
    ) {
        self.artifacts.push(ArtifactRecord {
            stage,
            artifact: artifact.into(),
            path,
            outcome,
        });
    }

    fn fail(&mut self, name: &str, stage: Stage, error: &ProvisionError) {
        warn!(client = name, %stage, %error, "client failed");
        self.clients.insert(
            name.to_string(),
            ClientStatus::Failed {
                stage,
                error: error.to_string(),
            },
        );
    }

    /// Roster entries that have not failed so far, in roster order.
    fn pending<'r>(&self, roster: &'r Roster) -> Vec<&'r str> {
        roster
            .iter()
            .filter(|name| !matches!(self.clients.get(*name), Some(ClientStatus::Failed { .. })))
            .collect()
    }

    pub fn failed_clients(&self) -> Vec<&str> {
        self.clients
            .iter()
            .filter(|(_, status)| matches!(status, ClientStatus::Failed { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn created(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.outcome == ArtifactOutcome::Created)
            .count()
    }
}

/// Presence and fingerprint of one store artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStatus {
    pub artifact: String,
    pub path: PathBuf,
    /// SHA-256 of the content; `None` when the artifact is absent.
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend: &'static str,
    pub artifacts: Vec<ArtifactStatus>,
    pub crl_valid: Option<bool>,
    pub revoked: Option<usize>,
    /// Whether the server certificate passes chain verification with the CRL applied.
    pub server_accepted: Option<bool>,
}

pub struct Provisioner {
    config: AppConfig,
    store: IdentityStore,
    issuer: Box<dyn Issuer>,
    renderer: Box<dyn Renderer>,
}

impl Provisioner {
    /// Issuer backend as selected by `config`, built-in templates.
    pub fn from_config(config: AppConfig) -> Self {
        let issuer = issuer::from_config(&config);
        Self::new(config, issuer, Box::new(OpenVpnRenderer))
    }

    pub fn new(config: AppConfig, issuer: Box<dyn Issuer>, renderer: Box<dyn Renderer>) -> Self {
        let store = IdentityStore::new(&config.paths.store_root);
        Self {
            config,
            store,
            issuer,
            renderer,
        }
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run every stage for `roster`. Returns `Err` only when a single-shot stage
    /// failed; per-client failures are in the report.
    pub fn provision(&self, roster: &Roster) -> Result<ProvisionReport> {
        let store = &self.store;
        let issuer = self.issuer.as_ref();
        let authority = CertificateAuthority::new(store, issuer);
        let server = ServerIdentityProvisioner::new(store, issuer);
        let revocation = RevocationManager::new(store, issuer);
        let clients = ClientIdentityProvisioner::new(store, issuer);
        let distributor = ArtifactDistributor::new(store, &self.config.paths);
        let composer = BundleComposer::new(store, &self.config, self.renderer.as_ref());
        let exporter = BundleExporter::new(&self.config);

        let mut scheduler = Scheduler::new();
        let mut report = ProvisionReport::default();
        info!(backend = issuer.backend(), clients = roster.len(), "provisioning started");

        let outcome = scheduler.run(Stage::InitPki, || authority.initialize_pki())?;
        report.artifact(Stage::InitPki, "pki", store.pki_dir(), outcome);

        let outcome = scheduler.run(Stage::Authority, || authority.build_authority())?;
        report.artifact(Stage::Authority, "ca certificate", store.ca_cert(), outcome);

        let outcome = scheduler.run(Stage::DhParams, || server.generate_dh_params())?;
        report.artifact(Stage::DhParams, "dh params", store.dh_params(), outcome);

        let outcome = scheduler.run(Stage::ServerCertificate, || server.issue_server_certificate())?;
        report.artifact(
            Stage::ServerCertificate,
            "server certificate",
            store.issued_cert(SERVER_COMMON_NAME),
            outcome,
        );

        let outcome = scheduler.run(Stage::AuthKey, || server.generate_auth_key())?;
        report.artifact(Stage::AuthKey, "auth key", store.auth_key(), outcome);

        let outcome = scheduler.run(Stage::RevocationList, || revocation.generate_crl())?;
        report.artifact(Stage::RevocationList, "crl", store.crl(), outcome);

        scheduler.run(Stage::ClientIdentities, || {
            for (name, result) in clients.issue_roster(roster) {
                match result {
                    Ok(outcome) => report.artifact(
                        Stage::ClientIdentities,
                        format!("client certificate {name}"),
                        store.issued_cert(name),
                        outcome,
                    ),
                    Err(e) => report.fail(name, Stage::ClientIdentities, &e),
                }
            }
            Ok(())
        })?;

        scheduler.run(Stage::Distribution, || {
            let files = distributor.distribute(Identity::Server, DestinationRole::Server)?;
            report.files.extend(files);
            for name in report.pending(roster) {
                match distributor.distribute(Identity::Client(name), DestinationRole::User) {
                    Ok(files) => report.files.extend(files),
                    Err(e) => report.fail(name, Stage::Distribution, &e),
                }
            }
            Ok(())
        })?;

        scheduler.run(Stage::Bundles, || {
            let file = composer.render_server_config()?;
            report.files.push(file);
            for name in report.pending(roster) {
                match composer.render_client_bundle(name) {
                    Ok(file) => report.files.push(file),
                    Err(e) => report.fail(name, Stage::Bundles, &e),
                }
            }
            Ok(())
        })?;

        scheduler.run(Stage::Export, || {
            for name in report.pending(roster) {
                match exporter.export(name) {
                    Ok(file) => {
                        report.clients.insert(
                            name.to_string(),
                            ClientStatus::Provisioned {
                                bundle: file.path.clone(),
                            },
                        );
                        report.files.push(file);
                    }
                    Err(e) => report.fail(name, Stage::Export, &e),
                }
            }
            Ok(())
        })?;

        info!(
            created = report.created(),
            failed = report.failed_clients().len(),
            "provisioning finished"
        );
        Ok(report)
    }

    /// Re-export already rendered bundles.
    pub fn export<'n>(&self, names: &[&'n str]) -> Vec<(&'n str, Result<FileRecord>)> {
        let exporter = BundleExporter::new(&self.config);
        names
            .iter()
            .map(|name| (*name, exporter.export(name)))
            .collect()
    }

    /// Revoke `name`, refresh the CRL, and delete the client's distributed files
    /// and exported bundle. The server's copy of the CRL is updated when the
    /// server identity has been distributed before.
    pub fn retire(&self, name: &str) -> Result<Vec<FileRecord>> {
        let store = &self.store;
        let issuer = self.issuer.as_ref();
        let revocation = RevocationManager::new(store, issuer);
        let clients = ClientIdentityProvisioner::new(store, issuer);
        let distributor = ArtifactDistributor::new(store, &self.config.paths);

        clients.retire(name, &revocation)?;
        distributor.remove_client(name)?;
        BundleExporter::new(&self.config).remove(name)?;

        let server_crl = self.config.paths.server_dir.join("crl.pem");
        if store.should_create(&server_crl)? {
            return Ok(Vec::new());
        }
        distributor.distribute(Identity::Server, DestinationRole::Server)
    }

    pub fn status(&self, roster: &Roster) -> Result<StatusReport> {
        let store = &self.store;
        let mut paths = vec![
            ("ca certificate".to_string(), store.ca_cert()),
            ("dh params".to_string(), store.dh_params()),
            ("server certificate".to_string(), store.issued_cert(SERVER_COMMON_NAME)),
            ("auth key".to_string(), store.auth_key()),
            ("crl".to_string(), store.crl()),
        ];
        paths.extend(
            roster
                .iter()
                .map(|name| (format!("client certificate {name}"), store.issued_cert(name))),
        );

        let mut artifacts = Vec::with_capacity(paths.len());
        for (artifact, path) in paths {
            let sha256 = if store.should_create(&path)? {
                None
            } else {
                Some(store.fingerprint(&path)?)
            };
            artifacts.push(ArtifactStatus {
                artifact,
                path,
                sha256,
            });
        }

        let revocation = RevocationManager::new(store, self.issuer.as_ref());
        let has_crl = !store.should_create(&store.crl())? && !store.should_create(&store.ca_cert())?;
        let (crl_valid, revoked) = if has_crl {
            (Some(revocation.verify_crl()?), Some(revocation.revoked_count()?))
        } else {
            (None, None)
        };
        let server_cert = store.issued_cert(SERVER_COMMON_NAME);
        let server_accepted = if has_crl && !store.should_create(&server_cert)? {
            Some(revocation.check_certificate(&server_cert)?)
        } else {
            None
        };

        Ok(StatusReport {
            backend: self.issuer.backend(),
            artifacts,
            crl_valid,
            revoked,
            server_accepted,
        })
    }
}
