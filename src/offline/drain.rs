use crate::errors::ServiceError;
use crate::offline::entity::Model;
use crate::offline::queue::OfflineQueue;
use crate::services::orders::CreateOrderRequest;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

/// Delivery failure. Every failure is retryable; the queue retries
/// until the server accepts the submission.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Abstraction over the wire used to deliver a submission.
///
/// Implementations must send the idempotency key with the request so
/// repeated deliveries of the same submission collapse server-side.
#[async_trait]
pub trait SubmitTransport: Send + Sync {
    async fn submit(
        &self,
        idempotency_key: &str,
        request: &CreateOrderRequest,
    ) -> Result<(), TransportError>;
}

/// HTTP transport posting to the server's order endpoint.
pub struct HttpSubmitTransport {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: String,
}

impl HttpSubmitTransport {
    pub fn new(
        endpoint: String,
        bearer_token: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            endpoint,
            bearer_token,
        })
    }
}

#[async_trait]
impl SubmitTransport for HttpSubmitTransport {
    async fn submit(
        &self,
        idempotency_key: &str,
        request: &CreateOrderRequest,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.bearer_token)
            .header(crate::handlers::orders::IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError(format!("Request failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError(format!(
                "Server returned {}",
                response.status()
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Base retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Cap on the computed delay
    pub backoff_max: Duration,
    /// Max submissions delivered per pass
    pub batch_size: u64,
    /// Interval between drain passes
    pub poll_interval: Duration,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            batch_size: 32,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Summary of one drain pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: u64,
    pub failed: u64,
}

/// Background worker delivering queued submissions to the server.
pub struct Drainer<T: SubmitTransport> {
    queue: OfflineQueue,
    transport: Arc<T>,
    config: DrainerConfig,
}

impl<T: SubmitTransport> Drainer<T> {
    pub fn new(queue: OfflineQueue, transport: Arc<T>, config: DrainerConfig) -> Self {
        Self {
            queue,
            transport,
            config,
        }
    }

    /// Delivers every due submission once.
    #[instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<DrainReport, ServiceError> {
        let due = self.queue.due(self.config.batch_size).await?;
        let mut report = DrainReport::default();

        for model in due {
            match self.deliver(model).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "Queue bookkeeping failed during drain");
                    return Err(e);
                }
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(delivered = report.delivered, failed = report.failed, "Drain pass completed");
        }
        Ok(report)
    }

    /// Attempts one delivery; returns whether it succeeded.
    async fn deliver(&self, model: Model) -> Result<bool, ServiceError> {
        let request = match OfflineQueue::decode_payload(&model) {
            Ok(request) => request,
            Err(e) => {
                // A corrupt payload can never succeed; park it far in
                // the future instead of hot-looping on it.
                warn!(submission_id = %model.id, error = %e, "Corrupt queue payload");
                let retry_at = Utc::now() + ChronoDuration::hours(24);
                self.queue.mark_failed(model, e.to_string(), retry_at).await?;
                return Ok(false);
            }
        };

        let model = self.queue.mark_sending(model).await?;
        debug!(submission_id = %model.id, attempt = model.retries + 1, "Delivering submission");

        match self
            .transport
            .submit(&model.idempotency_key, &request)
            .await
        {
            Ok(()) => {
                self.queue.mark_synced(model).await?;
                Ok(true)
            }
            Err(e) => {
                let delay = self.backoff_delay(model.retries);
                let retry_at = Utc::now()
                    + ChronoDuration::from_std(delay)
                        .unwrap_or_else(|_| ChronoDuration::seconds(60));
                warn!(
                    submission_id = %model.id,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "Delivery failed, scheduling retry"
                );
                self.queue.mark_failed(model, e.to_string(), retry_at).await?;
                Ok(false)
            }
        }
    }

    /// Exponential backoff with jitter, capped at `backoff_max`.
    fn backoff_delay(&self, retries: i32) -> Duration {
        let exponent = retries.clamp(0, 16) as u32;
        let base = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exponent));
        let capped = base.min(self.config.backoff_max);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().min(1000) as u64);
        capped + Duration::from_millis(jitter_ms)
    }

    /// Runs the drain loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        if let Err(e) = self.queue.recover_in_flight().await {
            error!(error = %e, "Failed to recover in-flight submissions");
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "Drain pass failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("Offline drainer shutting down");
                    break;
                }
            }
        }
    }
}
