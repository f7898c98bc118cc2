//! Admission Webhook Server
//!
//! Hosts the registered webhooks over HTTPS. When bound to a Service the server
//! keeps that Service pointed at its pods, and it can optionally install the
//! matching webhook configurations.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::core::admission::{AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Client;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::builder::{Webhook, WebhookKind};
use super::certs::ensure_serving_cert;
use crate::config::ServiceBinding;
use crate::constants::{CA_CERT_FILE, CERT_FILE, FIELD_MANAGER, KEY_FILE, LOCAL_HOST};
use crate::error::{Error, Result};
use crate::manager::Manager;

/// Port the webhook Service exposes to the API server
pub const SERVICE_PORT: i32 = 443;

const HEALTH_PATH: &str = "/healthz";

/// Where the API server reaches the webhook server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Service fronting the server; `None` when running outside the cluster
    pub service: Option<ServiceBinding>,

    /// Bind host; defaults to `localhost` without a Service, all interfaces with one
    pub host: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    pub port: u16,
    pub cert_dir: PathBuf,
    pub bootstrap: BootstrapOptions,
    pub disable_webhook_config_installer: bool,
}

pub struct WebhookServer {
    name: String,
    options: ServerOptions,
    host: String,
    client: Option<Client>,
    webhooks: Vec<Arc<Webhook>>,
}

impl WebhookServer {
    /// Create a server for `manager` after validating `options`
    pub fn new(name: &str, manager: &Manager, options: ServerOptions) -> Result<Self> {
        let invalid = |reason: String| Error::ServerConstruction(format!("{name}: {reason}"));

        if name.is_empty() {
            return Err(Error::ServerConstruction(
                "server name must not be empty".to_string(),
            ));
        }
        if options.port == 0 {
            return Err(invalid("port must be non-zero".to_string()));
        }
        if options.cert_dir.as_os_str().is_empty() {
            return Err(invalid("certificate directory must be set".to_string()));
        }
        if let Some(service) = &options.bootstrap.service {
            if service.namespace.is_empty() || service.name.is_empty() {
                return Err(invalid(
                    "service namespace and name must not be empty".to_string(),
                ));
            }
            if service.selectors.is_empty() {
                return Err(invalid("service selectors must not be empty".to_string()));
            }
        }

        let host = match (&options.bootstrap.host, &options.bootstrap.service) {
            (Some(host), _) => host.clone(),
            (None, None) => LOCAL_HOST.to_string(),
            (None, Some(_)) => Ipv4Addr::UNSPECIFIED.to_string(),
        };

        Ok(Self {
            name: name.to_string(),
            options,
            host,
            client: manager.client().cloned(),
            webhooks: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn webhooks(&self) -> &[Arc<Webhook>] {
        &self.webhooks
    }

    /// Register a batch of webhooks.
    ///
    /// Names and paths must be unique across the batch and everything
    /// registered before; nothing is registered if any check fails.
    pub fn register(&mut self, webhooks: Vec<Webhook>) -> Result<()> {
        let mut names: BTreeSet<String> =
            self.webhooks.iter().map(|w| w.name().to_string()).collect();
        let mut paths: BTreeSet<String> =
            self.webhooks.iter().map(|w| w.path().to_string()).collect();
        paths.insert(HEALTH_PATH.to_string());

        for webhook in &webhooks {
            if !names.insert(webhook.name().to_string()) {
                return Err(Error::Registration(format!(
                    "duplicate webhook name {:?}",
                    webhook.name()
                )));
            }
            if !paths.insert(webhook.path().to_string()) {
                return Err(Error::Registration(format!(
                    "webhook {:?} uses path {:?} which is already taken",
                    webhook.name(),
                    webhook.path()
                )));
            }
        }

        for webhook in webhooks {
            info!(
                server = %self.name,
                webhook = %webhook.name(),
                path = %webhook.path(),
                "Registered webhook"
            );
            self.webhooks.push(Arc::new(webhook));
        }
        Ok(())
    }

    /// HTTP routes: one POST route per webhook plus a health endpoint
    pub fn router(&self) -> Router {
        let mut router = Router::new().route(HEALTH_PATH, get(|| async { "ok" }));

        for webhook in &self.webhooks {
            let path = webhook.path().to_string();
            let webhook = Arc::clone(webhook);
            router = router.route(
                &path,
                post(move |Json(review): Json<AdmissionReview<DynamicObject>>| {
                    let webhook = Arc::clone(&webhook);
                    async move { Json(webhook.review(review).await) }
                }),
            );
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Names the serving certificate must cover
    pub fn serving_cert_names(&self) -> Vec<String> {
        match &self.options.bootstrap.service {
            Some(service) => vec![
                format!("{}.{}.svc", service.name, service.namespace),
                format!("{}.{}.svc.cluster.local", service.name, service.namespace),
            ],
            None => {
                let mut names = vec![LOCAL_HOST.to_string(), Ipv4Addr::LOCALHOST.to_string()];
                let unspecified = self
                    .host
                    .parse::<IpAddr>()
                    .is_ok_and(|ip| ip.is_unspecified());
                if !unspecified && !names.contains(&self.host) {
                    names.push(self.host.clone());
                }
                names
            }
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr> {
        let ip = if self.host == LOCAL_HOST {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host.parse::<IpAddr>().map_err(|e| {
                Error::ConfigError(format!("Invalid bind host {:?}: {}", self.host, e))
            })?
        };
        Ok(SocketAddr::new(ip, self.options.port))
    }

    /// Prepare cluster objects and serve until the server fails
    pub async fn run(self) -> Result<()> {
        if let (Some(client), Some(service)) = (&self.client, &self.options.bootstrap.service) {
            ensure_service(client, service, self.options.port).await?;
        }

        if !self.options.disable_webhook_config_installer {
            match &self.client {
                Some(client) => self.install_webhook_configs(client).await?,
                None => warn!(
                    server = %self.name,
                    "No Kubernetes client available, skipping webhook configuration install"
                ),
            }
        }

        ensure_serving_cert(&self.options.cert_dir, &self.serving_cert_names())?;

        let cert_pem = read_cert_file(&self.options.cert_dir.join(CERT_FILE)).await?;
        let key_pem = read_cert_file(&self.options.cert_dir.join(KEY_FILE)).await?;
        let tls = RustlsConfig::from_config(Arc::new(tls_server_config(&cert_pem, &key_pem)?));

        let addr = self.bind_addr()?;
        let app = self.router();
        info!(
            "Webhook server {} listening on {} with {} webhook(s)",
            self.name,
            addr,
            self.webhooks.len()
        );

        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
            .map_err(|e| Error::ConfigError(format!("Server error: {e}")))
    }

    async fn install_webhook_configs(&self, client: &Client) -> Result<()> {
        let ca_bundle = read_cert_file(&self.options.cert_dir.join(CA_CERT_FILE)).await?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let mutating = self.mutating_webhook_configuration(&ca_bundle);
        if mutating.webhooks.as_ref().is_some_and(|w| !w.is_empty()) {
            let api: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
            api.patch(&self.name, &params, &Patch::Apply(&mutating))
                .await
                .map_err(Error::KubeError)?;
            info!("Installed MutatingWebhookConfiguration {}", self.name);
        }

        let validating = self.validating_webhook_configuration(&ca_bundle);
        if validating.webhooks.as_ref().is_some_and(|w| !w.is_empty()) {
            let api: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
            api.patch(&self.name, &params, &Patch::Apply(&validating))
                .await
                .map_err(Error::KubeError)?;
            info!("Installed ValidatingWebhookConfiguration {}", self.name);
        }

        Ok(())
    }

    fn client_config(&self, webhook: &Webhook, ca_bundle: &[u8]) -> WebhookClientConfig {
        let ca_bundle = Some(ByteString(ca_bundle.to_vec()));
        match &self.options.bootstrap.service {
            Some(service) => WebhookClientConfig {
                ca_bundle,
                service: Some(ServiceReference {
                    name: service.name.clone(),
                    namespace: service.namespace.clone(),
                    path: Some(webhook.path().to_string()),
                    port: Some(SERVICE_PORT),
                }),
                url: None,
            },
            None => WebhookClientConfig {
                ca_bundle,
                service: None,
                url: Some(format!(
                    "https://{}:{}{}",
                    self.host,
                    self.options.port,
                    webhook.path()
                )),
            },
        }
    }

    /// Mutating webhook configuration covering every registered mutating webhook
    pub fn mutating_webhook_configuration(&self, ca_bundle: &[u8]) -> MutatingWebhookConfiguration {
        let webhooks = self
            .webhooks
            .iter()
            .filter(|w| w.kind() == WebhookKind::Mutating)
            .map(|w| MutatingWebhook {
                name: qualified_name(w.name()),
                client_config: self.client_config(w, ca_bundle),
                rules: Some(rules(w)),
                failure_policy: Some(w.failure_policy().as_str().to_string()),
                side_effects: "None".to_string(),
                admission_review_versions: vec!["v1".to_string()],
                ..Default::default()
            })
            .collect();

        MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            webhooks: Some(webhooks),
        }
    }

    /// Validating webhook configuration covering every registered validating webhook
    pub fn validating_webhook_configuration(
        &self,
        ca_bundle: &[u8],
    ) -> ValidatingWebhookConfiguration {
        let webhooks = self
            .webhooks
            .iter()
            .filter(|w| w.kind() == WebhookKind::Validating)
            .map(|w| ValidatingWebhook {
                name: qualified_name(w.name()),
                client_config: self.client_config(w, ca_bundle),
                rules: Some(rules(w)),
                failure_policy: Some(w.failure_policy().as_str().to_string()),
                side_effects: "None".to_string(),
                admission_review_versions: vec!["v1".to_string()],
                ..Default::default()
            })
            .collect();

        ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            webhooks: Some(webhooks),
        }
    }
}

/// Webhook names in configurations must be fully qualified
fn qualified_name(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{name}.interoperator.servicefabrik.io")
    }
}

fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

fn rules(webhook: &Webhook) -> Vec<RuleWithOperations> {
    let operations: Vec<String> = webhook
        .operations()
        .iter()
        .map(|op| operation_name(op).to_string())
        .collect();

    webhook
        .rules()
        .iter()
        .map(|rule| RuleWithOperations {
            api_groups: Some(vec![rule.api_group.clone()]),
            api_versions: Some(vec![rule.api_version.clone()]),
            resources: Some(vec![rule.resource.clone()]),
            operations: Some(operations.clone()),
            scope: None,
        })
        .collect()
}

/// Service routing the API server's webhook calls to the server pods
pub fn service_manifest(binding: &ServiceBinding, target_port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(binding.name.clone()),
            namespace: Some(binding.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(binding.selectors.clone()),
            ports: Some(vec![ServicePort {
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn ensure_service(client: &Client, binding: &ServiceBinding, port: u16) -> Result<()> {
    let services: Api<Service> = Api::namespaced(client.clone(), &binding.namespace);
    services
        .patch(
            &binding.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&service_manifest(binding, port)),
        )
        .await
        .map_err(Error::KubeError)?;

    info!(
        "Ensured webhook Service {}/{}",
        binding.namespace, binding.name
    );
    Ok(())
}

async fn read_cert_file(path: &std::path::Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::io(path, e))
}

/// Build the rustls server configuration from PEM certificate chain and key
pub fn tls_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_slice_iter(cert_pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsError(format!("Failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::TlsError("No certificate found in PEM data".to_string()));
    }

    let key = PrivateKeyDer::from_pem_slice(key_pem)
        .map_err(|e| Error::TlsError(format!("Failed to parse private key: {}", e)))?;

    rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::TlsError(format!("Failed to select protocol versions: {}", e)))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| Error::TlsError(format!("Failed to create server config: {}", e)))
}
