//! End-to-end tests: bootstrap a webhook server from a registry and talk to it
//! over HTTP and HTTPS.

use std::collections::BTreeMap;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use interoperator_webhook::constants::{
    CERT_FILE, RUN_ON_BOSH_ENV_KEY, WEBHOOK_CERT_DIR_ENV_KEY, WEBHOOK_PORT_ENV_KEY,
};
use interoperator_webhook::webhook::{
    bootstrap, AdmissionHandler, SharedHandler, WebhookBuilder, WebhookContext, WebhookRegistry,
};
use interoperator_webhook::{ConnectionConfig, Manager};
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use kube::core::{DynamicObject, ResourceExt};

/// Denies instances carrying the `illegal` label
struct LabelPolicy;

#[async_trait]
impl AdmissionHandler for LabelPolicy {
    async fn handle(
        &self,
        _ctx: &WebhookContext,
        req: &AdmissionRequest<DynamicObject>,
    ) -> AdmissionResponse {
        let response = AdmissionResponse::from(req);
        match &req.object {
            Some(obj) if obj.labels().contains_key("illegal") => {
                response.deny("instance carries the 'illegal' label")
            }
            _ => response,
        }
    }
}

fn review(uid: &str, labels: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "kind": {"group": "osb.servicefabrik.io", "version": "v1alpha1", "kind": "SFServiceInstance"},
            "resource": {"group": "osb.servicefabrik.io", "version": "v1alpha1", "resource": "sfserviceinstances"},
            "name": "instance-1",
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": {"username": "admin"},
            "object": {
                "apiVersion": "osb.servicefabrik.io/v1alpha1",
                "kind": "SFServiceInstance",
                "metadata": {"name": "instance-1", "namespace": "default", "labels": labels}
            },
            "dryRun": false
        }
    })
}

fn registry() -> WebhookRegistry {
    let mut registry = WebhookRegistry::new();
    registry.register_builder(
        "sfserviceinstance",
        WebhookBuilder::new("sfserviceinstance")
            .validating()
            .for_resource("osb.servicefabrik.io", "v1alpha1", "sfserviceinstances"),
    );
    registry.register_handlers(
        "sfserviceinstance",
        vec![Arc::new(LabelPolicy) as SharedHandler],
    );
    registry
}

fn self_signed() -> ConnectionConfig {
    let key = rcgen::KeyPair::generate().unwrap();
    let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .self_signed(&key)
        .unwrap();
    ConnectionConfig {
        ca_data: cert.pem().into_bytes(),
        cert_data: cert.pem().into_bytes(),
        key_data: key.serialize_pem().into_bytes(),
    }
}

fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn bootstrapped_router_answers_reviews() {
    let tmp = tempfile::tempdir().unwrap();
    let env = BTreeMap::from([
        (
            WEBHOOK_CERT_DIR_ENV_KEY.to_string(),
            tmp.path().display().to_string(),
        ),
        (RUN_ON_BOSH_ENV_KEY.to_string(), String::new()),
    ]);
    let mut manager = Manager::new(self_signed());
    bootstrap::add(&mut manager, &registry(), &env).unwrap();

    let app = manager.servers()[0].router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/validating-sfserviceinstance");

    let allowed: serde_json::Value = client
        .post(&url)
        .json(&review("ok-1", serde_json::json!({})))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(allowed["response"]["uid"], "ok-1");
    assert_eq!(allowed["response"]["allowed"], true);

    let denied: serde_json::Value = client
        .post(&url)
        .json(&review("bad-1", serde_json::json!({"illegal": "yes"})))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(denied["response"]["allowed"], false);

    let health = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());
}

fn tls_env(cert_dir: &std::path::Path, port: u16) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            WEBHOOK_CERT_DIR_ENV_KEY.to_string(),
            cert_dir.display().to_string(),
        ),
        (RUN_ON_BOSH_ENV_KEY.to_string(), String::new()),
        (WEBHOOK_PORT_ENV_KEY.to_string(), port.to_string()),
    ])
}

/// Post a review until the server accepts connections
async fn post_when_ready(url: &str, uid: &str) -> serde_json::Value {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();

    for _ in 0..50 {
        match client
            .post(url)
            .json(&review(uid, serde_json::json!({})))
            .send()
            .await
        {
            Ok(response) => return response.json().await.unwrap(),
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    panic!("webhook server did not come up");
}

#[tokio::test]
async fn manager_serves_webhooks_over_tls() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let identity = self_signed();
    let mut manager = Manager::new(identity.clone());
    bootstrap::add(&mut manager, &registry(), &tls_env(tmp.path(), port)).unwrap();
    tokio::spawn(manager.start());

    let url = format!("https://127.0.0.1:{port}/validating-sfserviceinstance");
    let answer = post_when_ready(&url, "tls-1").await;
    assert_eq!(answer["response"]["uid"], "tls-1");
    assert_eq!(answer["response"]["allowed"], true);

    // A usable seeded certificate is served as is.
    assert_eq!(
        std::fs::read(tmp.path().join(CERT_FILE)).unwrap(),
        identity.cert_data
    );
}

#[tokio::test]
async fn serving_cert_is_issued_without_client_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    // Token-authenticated kubeconfigs carry no client certificate or key.
    let mut manager = Manager::new(ConnectionConfig::default());
    bootstrap::add(&mut manager, &registry(), &tls_env(tmp.path(), port)).unwrap();
    assert!(std::fs::read(tmp.path().join(CERT_FILE)).unwrap().is_empty());
    tokio::spawn(manager.start());

    let url = format!("https://127.0.0.1:{port}/validating-sfserviceinstance");
    let answer = post_when_ready(&url, "tls-2").await;
    assert_eq!(answer["response"]["uid"], "tls-2");
    assert_eq!(answer["response"]["allowed"], true);

    let cert = std::fs::read_to_string(tmp.path().join(CERT_FILE)).unwrap();
    assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
}
