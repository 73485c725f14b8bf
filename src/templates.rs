//! Configuration templates and the render capability.
//!
//! The server configuration and the client bundle are askama templates under
//! `templates/`, compiled into the binary. Callers hand over a [`Bindings`] map;
//! [`OpenVpnRenderer`] moves it into the typed template context, so a binding the
//! template needs but the caller did not supply fails the render instead of
//! producing a document with a hole in it.

use std::collections::BTreeMap;
use std::fmt;

use askama::Template;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateId {
    ServerConfig,
    ClientBundle,
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateId::ServerConfig => f.write_str("server config"),
            TemplateId::ClientBundle => f.write_str("client bundle"),
        }
    }
}

/// Values bound to template fields. Values may hold key material and are wiped
/// when the bindings are dropped.
#[derive(Default)]
pub struct Bindings {
    values: BTreeMap<&'static str, Zeroizing<String>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &'static str, value: impl Into<String>) -> &mut Self {
        self.values.insert(name, Zeroizing::new(value.into()));
        self
    }

    pub fn bind_secret(&mut self, name: &'static str, value: &SecretString) -> &mut Self {
        self.bind(name, value.expose_secret().trim_end())
    }

    /// Bind only the PEM part of `value`, dropping any text dump that precedes it
    /// (easy-rsa writes certificates with one).
    pub fn bind_pem(&mut self, name: &'static str, value: &SecretString) -> &mut Self {
        let text = value.expose_secret();
        let start = text.find("-----BEGIN").unwrap_or(0);
        self.bind(name, text[start..].trim_end())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // names only, values may be private keys
        f.debug_set().entries(self.values.keys()).finish()
    }
}

pub trait Renderer {
    fn render(&self, template: TemplateId, bindings: &Bindings) -> Result<Zeroizing<String>>;
}

#[derive(Template)]
#[template(path = "server.conf", escape = "none")]
struct ServerConfigTemplate<'a> {
    port: &'a str,
    proto: &'a str,
    device: &'a str,
    ca_path: &'a str,
    cert_path: &'a str,
    key_path: &'a str,
    dh_path: &'a str,
    auth_key_path: &'a str,
    crl_path: &'a str,
    subnet: &'a str,
    netmask: &'a str,
    push_dns: &'a str,
}

#[derive(Template)]
#[template(path = "client.ovpn", escape = "none")]
struct ClientBundleTemplate<'a> {
    client_name: &'a str,
    remote_host: &'a str,
    port: &'a str,
    proto: &'a str,
    device: &'a str,
    ca_cert: &'a str,
    client_cert: &'a str,
    client_key: &'a str,
    auth_key: &'a str,
}

/// Renders the built-in OpenVPN templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenVpnRenderer;

impl Renderer for OpenVpnRenderer {
    fn render(&self, template: TemplateId, bindings: &Bindings) -> Result<Zeroizing<String>> {
        let step = format!("render {template}");
        let value = |name: &str| {
            bindings
                .get(name)
                .ok_or_else(|| ProvisionError::tool(&step, format!("no value bound for {name:?}")))
        };

        let rendered = match template {
            TemplateId::ServerConfig => ServerConfigTemplate {
                port: value("port")?,
                proto: value("proto")?,
                device: value("device")?,
                ca_path: value("ca_path")?,
                cert_path: value("cert_path")?,
                key_path: value("key_path")?,
                dh_path: value("dh_path")?,
                auth_key_path: value("auth_key_path")?,
                crl_path: value("crl_path")?,
                subnet: value("subnet")?,
                netmask: value("netmask")?,
                push_dns: value("push_dns")?,
            }
            .render(),
            TemplateId::ClientBundle => ClientBundleTemplate {
                client_name: value("client_name")?,
                remote_host: value("remote_host")?,
                port: value("port")?,
                proto: value("proto")?,
                device: value("device")?,
                ca_cert: value("ca_cert")?,
                client_cert: value("client_cert")?,
                client_key: value("client_key")?,
                auth_key: value("auth_key")?,
            }
            .render(),
        };
        rendered
            .map(Zeroizing::new)
            .map_err(|e| ProvisionError::tool(&step, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_bindings() -> Bindings {
        let mut bindings = Bindings::new();
        bindings
            .bind("client_name", "alice")
            .bind("remote_host", "vpn.test")
            .bind("port", "1194")
            .bind("proto", "udp")
            .bind("device", "tun")
            .bind("ca_cert", "CA-PEM")
            .bind("client_cert", "ALICE-CERT")
            .bind("client_key", "ALICE-KEY")
            .bind("auth_key", "TA-KEY");
        bindings
    }

    #[test]
    fn test_client_bundle_inlines_material() {
        let out = OpenVpnRenderer
            .render(TemplateId::ClientBundle, &client_bindings())
            .unwrap();
        assert!(out.contains("remote vpn.test 1194"));
        assert!(out.contains("<ca>\nCA-PEM\n</ca>"));
        assert!(out.contains("<cert>\nALICE-CERT\n</cert>"));
        assert!(out.contains("<key>\nALICE-KEY\n</key>"));
        assert!(out.contains("<tls-auth>\nTA-KEY\n</tls-auth>"));
        assert!(out.contains("key-direction 1"));
    }

    #[test]
    fn test_values_are_not_escaped() {
        let mut bindings = client_bindings();
        bindings.bind("client_cert", "<b>&\"quoted\"</b>");
        let out = OpenVpnRenderer
            .render(TemplateId::ClientBundle, &bindings)
            .unwrap();
        assert!(out.contains("<b>&\"quoted\"</b>"));
    }

    #[test]
    fn test_unbound_value_fails() {
        let err = OpenVpnRenderer
            .render(TemplateId::ClientBundle, &Bindings::new())
            .unwrap_err();
        match err {
            ProvisionError::ToolInvocation { step, message } => {
                assert_eq!(step, "render client bundle");
                assert!(message.contains("client_name"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_server_config_enables_crl_check() {
        let mut bindings = Bindings::new();
        for name in [
            "port", "proto", "device", "ca_path", "cert_path", "key_path", "dh_path",
            "auth_key_path", "subnet", "netmask", "push_dns",
        ] {
            bindings.bind(name, name.to_uppercase());
        }
        let err = OpenVpnRenderer
            .render(TemplateId::ServerConfig, &bindings)
            .unwrap_err();
        assert!(err.to_string().contains("crl_path"));

        bindings.bind("crl_path", "/etc/openvpn/server/crl.pem");
        let out = OpenVpnRenderer
            .render(TemplateId::ServerConfig, &bindings)
            .unwrap();
        assert!(out.contains("crl-verify /etc/openvpn/server/crl.pem"));
        assert!(out.contains("tls-auth AUTH_KEY_PATH 0"));
    }

    #[test]
    fn test_secret_binding_trims_trailing_newline() {
        let mut bindings = Bindings::new();
        bindings.bind_secret("key", &SecretString::from("-----BEGIN-----\n".to_string()));
        assert_eq!(bindings.get("key"), Some("-----BEGIN-----"));
        assert_eq!(format!("{bindings:?}"), "{\"key\"}");
    }

    #[test]
    fn test_pem_binding_drops_text_dump() {
        let cert = "Certificate:\n    Data: ...\n-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let mut bindings = Bindings::new();
        bindings.bind_pem("cert", &SecretString::from(cert.to_string()));
        assert_eq!(
            bindings.get("cert"),
            Some("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----")
        );
    }
}
