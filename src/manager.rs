//! Operator manager
//!
//! Holds the cluster connection material the webhook bootstrap seeds its
//! certificate directory from, the optional Kubernetes client handed to
//! webhooks, and the servers added during startup.

use std::path::Path;

use base64::Engine;
use futures::future::try_join_all;
use kube::Client;
use secrecy::ExposeSecret;
use tracing::info;

use crate::error::{Error, Result};
use crate::webhook::WebhookServer;

/// PEM material of the connection to the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub ca_data: Vec<u8>,
    pub cert_data: Vec<u8>,
    pub key_data: Vec<u8>,
}

impl ConnectionConfig {
    /// Extract CA, client certificate and client key from a kube config.
    ///
    /// Root certificates are stored as DER by `kube` and are re-armored as PEM.
    /// Client certificate and key come from the inline `*-data` fields when
    /// present, otherwise from the referenced files. Absent material yields an
    /// empty buffer.
    pub fn from_kube_config(config: &kube::Config) -> Result<Self> {
        let ca_data = config
            .root_cert
            .as_deref()
            .unwrap_or_default()
            .iter()
            .flat_map(|der| pem_armor("CERTIFICATE", der).into_bytes())
            .collect();

        let auth = &config.auth_info;
        let cert_data = match (&auth.client_certificate_data, &auth.client_certificate) {
            (Some(data), _) => decode_base64("client-certificate-data", data)?,
            (None, Some(path)) => read_file(path)?,
            (None, None) => Vec::new(),
        };
        let key_data = match (&auth.client_key_data, &auth.client_key) {
            (Some(data), _) => decode_base64("client-key-data", data.expose_secret())?,
            (None, Some(path)) => read_file(path)?,
            (None, None) => Vec::new(),
        };

        Ok(Self {
            ca_data,
            cert_data,
            key_data,
        })
    }
}

fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| Error::ConfigError(format!("Invalid base64 in {field}: {e}")))
}

fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| Error::io(path, e))
}

/// Wrap DER bytes in a PEM block with LF line endings
pub(crate) fn pem_armor(label: &str, der: &[u8]) -> String {
    pem::encode_config(
        &pem::Pem::new(label, der),
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Owns the startup-time state of the operator process
pub struct Manager {
    connection: ConnectionConfig,
    client: Option<Client>,
    servers: Vec<WebhookServer>,
}

impl Manager {
    /// Manager without a Kubernetes client (local runs and tests)
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            client: None,
            servers: Vec::new(),
        }
    }

    /// Attach a Kubernetes client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Manager connected to the cluster described by `config`
    pub fn from_kube_config(config: kube::Config) -> Result<Self> {
        let connection = ConnectionConfig::from_kube_config(&config)?;
        let client = Client::try_from(config).map_err(Error::KubeError)?;
        Ok(Self::new(connection).with_client(client))
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Hand a server to the manager; it is started by [`Manager::start`]
    pub fn add_server(&mut self, server: WebhookServer) {
        self.servers.push(server);
    }

    pub fn servers(&self) -> &[WebhookServer] {
        &self.servers
    }

    /// Run every added server until one of them fails
    pub async fn start(self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::ConfigError(
                "No webhook servers were added to the manager".to_string(),
            ));
        }

        info!("Starting {} webhook server(s)", self.servers.len());
        try_join_all(self.servers.into_iter().map(WebhookServer::run)).await?;
        Ok(())
    }
}
