//! Webhook HTTP server handlers
//!
//! Implements the ValidatingAdmissionWebhook endpoint for PostgresCluster.

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::policies::{ValidationContext, validate_all};
use crate::crd::PostgresCluster;

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest>,
}

/// AdmissionRequest contains the details of the admission request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub operation: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
}

/// AdmissionReview response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

/// AdmissionResponse contains the result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionStatus {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Create the webhook router
pub(crate) fn create_webhook_router() -> Router {
    Router::new().route("/validate", post(validate_postgres_cluster))
}

/// Validate PostgresCluster admission webhook handler
pub(crate) async fn validate_postgres_cluster(Json(review): Json<AdmissionReview>) -> impl IntoResponse {
    let Some(request) = review.request else {
        error!("Admission review missing request");
        return (
            StatusCode::BAD_REQUEST,
            Json(create_response("", false, "Missing request in AdmissionReview", None, Vec::new())),
        );
    };

    info!(
        uid = %request.uid,
        operation = %request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    (StatusCode::OK, Json(review_request(request)))
}

/// Decide on a single admission request
pub(crate) fn review_request(request: AdmissionRequest) -> AdmissionReviewResponse {
    let uid = request.uid;

    // Parse the new object
    let cluster: PostgresCluster = match request.object {
        Some(obj) => match serde_json::from_value(obj) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to parse PostgresCluster");
                return create_response(
                    &uid,
                    false,
                    &format!("Failed to parse object: {}", e),
                    None,
                    Vec::new(),
                );
            }
        },
        None => {
            // DELETE operations may not have object
            if request.operation == "DELETE" {
                return create_response(&uid, true, "", None, Vec::new());
            }
            return create_response(&uid, false, "Missing object in request", None, Vec::new());
        }
    };

    // Parse the old object for UPDATE operations
    let old_cluster: Option<PostgresCluster> = match request.old_object {
        Some(obj) => match serde_json::from_value(obj) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "Failed to parse old PostgresCluster, treating as CREATE");
                None
            }
        },
        None => None,
    };

    let ctx = ValidationContext::new(&cluster, old_cluster.as_ref());
    let result = validate_all(&ctx);

    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
        return create_response(&uid, false, &message, Some(&reason), result.warnings);
    }

    for warning in &result.warnings {
        info!(uid = %uid, warning = %warning, "Admitted with warning");
    }
    info!(uid = %uid, "Admission request allowed");
    create_response(&uid, true, "", None, result.warnings)
}

/// Create an AdmissionReview response
fn create_response(
    uid: &str,
    allowed: bool,
    message: &str,
    reason: Option<&str>,
    warnings: Vec<String>,
) -> AdmissionReviewResponse {
    AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response: AdmissionResponse {
            uid: uid.to_string(),
            allowed,
            status: if allowed {
                None
            } else {
                Some(AdmissionStatus {
                    code: 403,
                    message: message.to_string(),
                    reason: reason.map(String::from),
                })
            },
            warnings,
        },
    }
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0 on `port` and serves the /validate endpoint.
/// Certificate and key are PEM files.
pub async fn run_webhook_server(port: u16, cert_path: &str, key_path: &str) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router();

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Webhook server listening on {} with TLS", addr);

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Errors that can occur when running the webhook server
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Webhook server error: {0}")]
    Server(String),
}
