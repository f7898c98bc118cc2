//! Names, environment keys and defaults shared across the operator

/// Presence of this variable means the operator runs outside the cluster
pub const RUN_ON_BOSH_ENV_KEY: &str = "RUN_ON_BOSH";

/// Namespace the operator (and its webhook Service) lives in
pub const NAMESPACE_ENV_KEY: &str = "POD_NAMESPACE";
pub const DEFAULT_NAMESPACE: &str = "default";

pub const WEBHOOK_PORT_ENV_KEY: &str = "WEBHOOK_PORT";
pub const DEFAULT_WEBHOOK_PORT: u16 = 9876;

pub const WEBHOOK_CERT_DIR_ENV_KEY: &str = "WEBHOOK_CERT_DIR";
pub const DEFAULT_CERT_DIR: &str = "/tmp/cert";

pub const WEBHOOK_SERVER_NAME: &str = "admission-server";
pub const WEBHOOK_SERVICE_NAME: &str = "webhook-server-service";

/// Label selecting the controller-manager pod that hosts the webhook server
pub const CONTROLLER_SELECTOR_KEY: &str = "app";
pub const CONTROLLER_SELECTOR_VALUE: &str = "interoperator-controller-manager";

/// Host used when no Service binding is configured
pub const LOCAL_HOST: &str = "localhost";

pub const CA_CERT_FILE: &str = "ca-cert.pem";
pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const CA_KEY_FILE: &str = "ca-key.pem";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "interoperator-webhook";
