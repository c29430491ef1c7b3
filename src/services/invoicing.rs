use crate::errors::ServiceError;
use crate::services::orders::InvoiceSnapshot;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Client for the external e-invoicing collaborator.
///
/// Submission is best-effort: order close never waits on or fails
/// because of this service. When no endpoint is configured every call
/// is a logged no-op.
#[derive(Debug, Clone)]
pub struct InvoicingService {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl InvoicingService {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, endpoint })
    }

    /// Submits a closed order for invoicing.
    #[instrument(skip(self, snapshot), fields(order_id = %snapshot.order_id))]
    pub async fn submit_invoice(&self, snapshot: &InvoiceSnapshot) -> Result<(), ServiceError> {
        let Some(endpoint) = &self.endpoint else {
            debug!("Invoicing endpoint not configured, skipping submission");
            return Ok(());
        };

        let response = self
            .client
            .post(endpoint)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Invoice submission failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Invoicing service returned {}",
                response.status()
            )));
        }

        info!(order_id = %snapshot.order_id, "Invoice submitted");
        Ok(())
    }
}
