//! Bundle Composer
//!
//! The server configuration references the distributed artifacts by path. A client
//! bundle instead inlines its material, read back from that client's own
//! distribution directory and nowhere else.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::info;

use crate::configs::{AppConfig, NetworkConfig};
use crate::distributor::{DestinationRole, FileRecord};
use crate::error::Result;
use crate::identity_store::{write_if_changed, IdentityStore};
use crate::server_identity::SERVER_COMMON_NAME;
use crate::templates::{Bindings, Renderer, TemplateId};

pub const SERVER_CONFIG_FILE: &str = "server.conf";

/// File name of `name`'s bundle, as distributed and as exported.
pub fn bundle_file_name(name: &str, extension: &str) -> String {
    format!("{name}.{extension}")
}

pub struct BundleComposer<'a> {
    store: &'a IdentityStore,
    server_dir: &'a Path,
    users_dir: &'a Path,
    network: &'a NetworkConfig,
    extension: &'a str,
    renderer: &'a dyn Renderer,
}

impl<'a> BundleComposer<'a> {
    pub fn new(store: &'a IdentityStore, config: &'a AppConfig, renderer: &'a dyn Renderer) -> Self {
        Self {
            store,
            server_dir: &config.paths.server_dir,
            users_dir: &config.paths.users_dir,
            network: &config.network,
            extension: &config.bundles.extension,
            renderer,
        }
    }

    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.users_dir
            .join(name)
            .join(bundle_file_name(name, self.extension))
    }

    pub fn render_server_config(&self) -> Result<FileRecord> {
        let artifact = |file: &str| self.server_dir.join(file).display().to_string();
        let push_dns = self
            .network
            .push_dns
            .iter()
            .map(|dns| format!("push \"dhcp-option DNS {dns}\""))
            .collect::<Vec<_>>()
            .join("\n");

        let mut bindings = Bindings::new();
        bindings
            .bind("ca_path", artifact("ca.crt"))
            .bind("cert_path", artifact(&format!("{SERVER_COMMON_NAME}.crt")))
            .bind("key_path", artifact(&format!("{SERVER_COMMON_NAME}.key")))
            .bind("dh_path", artifact("dh.pem"))
            .bind("auth_key_path", artifact("ta.key"))
            .bind("crl_path", artifact("crl.pem"))
            .bind("port", self.network.port.to_string())
            .bind("proto", self.network.proto.as_str())
            .bind("device", self.network.device.as_str())
            .bind("subnet", self.network.subnet.as_str())
            .bind("netmask", self.network.netmask.as_str())
            .bind("push_dns", push_dns);

        let document = self.renderer.render(TemplateId::ServerConfig, &bindings)?;
        let path = self.server_dir.join(SERVER_CONFIG_FILE);
        let outcome = write_if_changed(&path, document.as_bytes(), DestinationRole::Server.mode())?;
        info!(path = %path.display(), ?outcome, "server config rendered");
        Ok(FileRecord { path, outcome })
    }

    /// RenderClientBundle: inline CA cert, auth key and `name`'s own cert and key.
    pub fn render_client_bundle(&self, name: &str) -> Result<FileRecord> {
        let step = format!("render bundle {name}");
        let dir = self.users_dir.join(name);
        let read = |file: String| -> Result<SecretString> {
            let path = dir.join(file);
            self.store.require(&step, &path)?;
            self.store.read_secret(&path)
        };

        let mut bindings = Bindings::new();
        bindings
            .bind("client_name", name)
            .bind("remote_host", self.network.public_host.as_str())
            .bind("port", self.network.port.to_string())
            .bind("proto", self.network.proto.as_str())
            .bind("device", self.network.device.as_str())
            .bind_pem("ca_cert", &read("ca.crt".to_string())?)
            .bind_pem("client_cert", &read(format!("{name}.crt"))?)
            .bind_pem("client_key", &read(format!("{name}.key"))?)
            .bind_secret("auth_key", &read("ta.key".to_string())?);

        let document = self.renderer.render(TemplateId::ClientBundle, &bindings)?;
        let path = self.bundle_path(name);
        let outcome = write_if_changed(&path, document.as_bytes(), DestinationRole::User.mode())?;
        info!(client = name, path = %path.display(), ?outcome, "client bundle rendered");
        Ok(FileRecord { path, outcome })
    }
}
