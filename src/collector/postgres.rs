//! Direct PostgreSQL connections to instance pods
//!
//! Connects to a pod IP with the superuser credentials from the cluster
//! credentials secret. Requires the operator to run in-cluster with network
//! access to port 5432 of the instance pods.

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use rustls::pki_types::{CertificateDer, ServerName};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::NoTls;
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::trace;

use super::{CollectionError, Result};

pub const POSTGRES_PORT: u16 = 5432;

/// TLS mode for PostgreSQL connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// No TLS
    Disabled,
    /// Require TLS but skip certificate verification. Pods are reached by
    /// IP, which their certificates do not name.
    RequireUnverified,
}

/// PostgreSQL connection credentials
#[derive(Clone)]
pub struct PostgresCredentials {
    pub username: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for PostgresCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentials")
            .field("username", &self.username)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl PostgresCredentials {
    /// Extract credentials from a cluster credentials secret
    ///
    /// Expects the `POSTGRES_PASSWORD` key; user and database are `postgres`.
    pub fn from_cluster_secret(secret: &Secret) -> Result<Self> {
        let data = secret
            .data
            .as_ref()
            .ok_or_else(|| CollectionError::Credentials("no data in secret".into()))?;

        let password_bytes = data
            .get("POSTGRES_PASSWORD")
            .ok_or_else(|| CollectionError::Credentials("missing POSTGRES_PASSWORD".into()))?;

        let password = String::from_utf8(password_bytes.0.clone())
            .map_err(|_| CollectionError::Credentials("invalid UTF-8 in password".into()))?;

        Ok(Self {
            username: "postgres".to_string(),
            password,
            database: "postgres".to_string(),
        })
    }
}

/// Name of the secret holding superuser credentials for a cluster
pub fn credentials_secret_name(cluster_name: &str) -> String {
    format!("{}-credentials", cluster_name)
}

/// Fetch credentials from the cluster credentials secret
pub async fn fetch_credentials(client: &Client, namespace: &str, secret_name: &str) -> Result<PostgresCredentials> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let secret = secrets.get(secret_name).await.map_err(|e| match &e {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            CollectionError::Credentials(format!("secret {} not found", secret_name))
        }
        _ => CollectionError::KubeError(e),
    })?;

    PostgresCredentials::from_cluster_secret(&secret)
}

/// Open a connection to `host`; the connection task is spawned
pub async fn connect(
    host: &str,
    credentials: &PostgresCredentials,
    tls_mode: TlsMode,
    connect_timeout: Duration,
) -> Result<tokio_postgres::Client> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(host)
        .port(POSTGRES_PORT)
        .user(&credentials.username)
        .password(&credentials.password)
        .dbname(&credentials.database)
        .application_name("postgres-storage-operator")
        .connect_timeout(connect_timeout);

    let client = match tls_mode {
        TlsMode::Disabled => {
            let (client, connection) = config.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    trace!(error = %e, "PostgreSQL connection closed");
                }
            });
            client
        }
        TlsMode::RequireUnverified => {
            config.ssl_mode(tokio_postgres::config::SslMode::Require);
            let (client, connection) = config.connect(build_tls_connector()?).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    trace!(error = %e, "PostgreSQL TLS connection closed");
                }
            });
            client
        }
    };

    Ok(client)
}

fn build_tls_connector() -> Result<MakeRustlsConnect> {
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .ok_or_else(|| CollectionError::TlsConfig("no rustls crypto provider installed".into()))?;
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| CollectionError::TlsConfig(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

/// Certificate verifier that accepts any certificate
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
