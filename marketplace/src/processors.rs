//! External payment processors.
//!
//! Both rails are opaque services offering "create payment" and "capture
//! payment". Responses are translated into [`ProcessorOutcome`] here, so the
//! reconciliation engine never sees a provider-specific payload.

use crate::config::{PaymentConfig, ProcessorEndpoint};
use crate::types::{PaymentIntent, Processor, ProcessorOutcome};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Processor call result
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Boxed future returned by processor calls
pub type ProcessorFuture<'a, T> = Pin<Box<dyn Future<Output = ProcessorResult<T>> + Send + 'a>>;

/// Processor error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// The processor declined the payment
    #[error("Payment rejected by processor: {reason}")]
    Rejected {
        /// Decline reason
        reason: String,
    },
    /// The processor could not be reached or failed internally
    #[error("Payment processor unavailable: {message}")]
    Unavailable {
        /// Detail
        message: String,
    },
    /// No answer within the configured bound
    #[error("Payment processor timed out after {0:?}")]
    Timeout(Duration),
    /// Response could not be understood
    #[error("Invalid processor response: {0}")]
    InvalidResponse(String),
}

/// The processor's acknowledgement of a created payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPayment {
    /// Processor-side identifier
    pub external_ref: String,
}

/// Payment processor trait
///
/// One implementation per rail. Calls carry no timeout of their own; the
/// [`PaymentProcessors`] registry bounds them.
pub trait PaymentProcessor: Send + Sync {
    /// Rail this processor serves
    fn processor(&self) -> Processor;

    /// Create a payment for `intent`
    ///
    /// # Errors
    ///
    /// Returns error if the processor declines or cannot be reached
    fn create_payment(&self, intent: &PaymentIntent) -> ProcessorFuture<'_, ExternalPayment>;

    /// Capture a created payment and report its outcome
    ///
    /// # Errors
    ///
    /// Returns error if the processor cannot be reached
    fn capture_payment(&self, external_ref: &str) -> ProcessorFuture<'_, ProcessorOutcome>;
}

// ============================================================================
// Mock processor
// ============================================================================

/// What the mock does on `create_payment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Accept and return a fresh reference
    Accept,
    /// Decline with this reason
    Reject(String),
    /// Never answer
    Hang,
}

/// Scriptable processor for development and tests.
#[derive(Debug)]
pub struct MockPaymentProcessor {
    processor: Processor,
    behavior: Mutex<MockBehavior>,
    capture_outcome: Mutex<ProcessorOutcome>,
    create_calls: AtomicUsize,
}

impl MockPaymentProcessor {
    /// A mock that accepts every payment and captures successfully
    #[must_use]
    pub const fn new(processor: Processor) -> Self {
        Self {
            processor,
            behavior: Mutex::new(MockBehavior::Accept),
            capture_outcome: Mutex::new(ProcessorOutcome::Success),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Change what `create_payment` does
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Change what `capture_payment` reports
    pub fn set_capture_outcome(&self, outcome: ProcessorOutcome) {
        *self
            .capture_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = outcome;
    }

    /// Number of `create_payment` calls received
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn prefix(&self) -> &'static str {
        match self.processor {
            Processor::ProcessorA => "card",
            Processor::ProcessorB => "wallet",
        }
    }
}

impl PaymentProcessor for MockPaymentProcessor {
    fn processor(&self) -> Processor {
        self.processor
    }

    fn create_payment(&self, intent: &PaymentIntent) -> ProcessorFuture<'_, ExternalPayment> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let intent_id = intent.id;
        let amount = intent.amount;
        Box::pin(async move {
            match behavior {
                MockBehavior::Accept => {
                    let external_ref = format!("{}_{}", self.prefix(), uuid::Uuid::new_v4().simple());
                    tracing::info!(
                        payment_intent_id = %intent_id,
                        amount = amount.cents(),
                        external_ref = %external_ref,
                        "Mock payment created"
                    );
                    Ok(ExternalPayment { external_ref })
                }
                MockBehavior::Reject(reason) => Err(ProcessorError::Rejected { reason }),
                MockBehavior::Hang => std::future::pending().await,
            }
        })
    }

    fn capture_payment(&self, external_ref: &str) -> ProcessorFuture<'_, ProcessorOutcome> {
        let outcome = *self
            .capture_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let external_ref = external_ref.to_string();
        Box::pin(async move {
            tracing::info!(external_ref = %external_ref, ?outcome, "Mock payment captured");
            Ok(outcome)
        })
    }
}

// ============================================================================
// HTTP processor
// ============================================================================

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    amount: i64,
    currency: &'a str,
    reference: String,
}

#[derive(Deserialize)]
struct PaymentResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// JSON-over-HTTP client for a processor API.
///
/// `POST {base}/payments` creates, `POST {base}/payments/{id}/capture`
/// captures; both answer `{ "id": ..., "status": ... }`.
#[derive(Debug, Clone)]
pub struct HttpPaymentProcessor {
    processor: Processor,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPaymentProcessor {
    /// Creates a client for `base_url`
    #[must_use]
    pub fn new(processor: Processor, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            processor,
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProcessorResult<PaymentResponse> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() {
            let reason = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Rejected {
                reason: format!("{status}: {reason}"),
            });
        }
        if !status.is_success() {
            return Err(ProcessorError::Unavailable {
                message: format!("processor answered {status}"),
            });
        }
        response
            .json::<PaymentResponse>()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))
    }
}

/// A creation response that will never settle: failed or already cancelled.
fn declined_on_creation(status: &str) -> bool {
    matches!(
        ProcessorOutcome::from_provider_status(status),
        ProcessorOutcome::Failure | ProcessorOutcome::Cancelled
    )
}

impl PaymentProcessor for HttpPaymentProcessor {
    fn processor(&self) -> Processor {
        self.processor
    }

    fn create_payment(&self, intent: &PaymentIntent) -> ProcessorFuture<'_, ExternalPayment> {
        let url = format!("{}/payments", self.base_url);
        let amount = intent.amount.cents();
        let currency = intent.currency.clone();
        let reference = intent.id.to_string();
        Box::pin(async move {
            let request = self.client.post(url).json(&CreatePaymentBody {
                amount,
                currency: &currency,
                reference,
            });
            let body = self.send(request).await?;
            if declined_on_creation(body.status.as_deref().unwrap_or_default()) {
                return Err(ProcessorError::Rejected {
                    reason: body.status.unwrap_or_default(),
                });
            }
            body.id
                .filter(|id| !id.is_empty())
                .map(|external_ref| ExternalPayment { external_ref })
                .ok_or_else(|| ProcessorError::InvalidResponse("missing payment id".to_string()))
        })
    }

    fn capture_payment(&self, external_ref: &str) -> ProcessorFuture<'_, ProcessorOutcome> {
        let url = format!("{}/payments/{external_ref}/capture", self.base_url);
        Box::pin(async move {
            let body = self.send(self.client.post(url)).await?;
            Ok(ProcessorOutcome::from_provider_status(
                body.status.as_deref().unwrap_or_default(),
            ))
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// The two configured rails and the bound applied to every call.
#[derive(Clone)]
pub struct PaymentProcessors {
    card: Arc<dyn PaymentProcessor>,
    wallet: Arc<dyn PaymentProcessor>,
    timeout: Duration,
}

impl PaymentProcessors {
    /// Creates a registry
    #[must_use]
    pub fn new(
        card: Arc<dyn PaymentProcessor>,
        wallet: Arc<dyn PaymentProcessor>,
        timeout: Duration,
    ) -> Self {
        Self {
            card,
            wallet,
            timeout,
        }
    }

    /// HTTP processors for configured URLs, mocks otherwise
    #[must_use]
    pub fn from_config(config: &PaymentConfig) -> Self {
        fn build(processor: Processor, endpoint: &ProcessorEndpoint) -> Arc<dyn PaymentProcessor> {
            match &endpoint.url {
                Some(url) => Arc::new(HttpPaymentProcessor::new(
                    processor,
                    url.clone(),
                    endpoint.api_key.clone(),
                )),
                None => {
                    tracing::warn!(%processor, "No processor URL configured, using mock processor");
                    Arc::new(MockPaymentProcessor::new(processor))
                }
            }
        }
        Self::new(
            build(Processor::ProcessorA, &config.card),
            build(Processor::ProcessorB, &config.wallet),
            config.processor_timeout(),
        )
    }

    /// The processor serving `processor`
    #[must_use]
    pub fn get(&self, processor: Processor) -> &Arc<dyn PaymentProcessor> {
        match processor {
            Processor::ProcessorA => &self.card,
            Processor::ProcessorB => &self.wallet,
        }
    }

    /// Create a payment, bounded by the configured timeout
    ///
    /// # Errors
    ///
    /// [`ProcessorError::Timeout`] when the bound elapses, otherwise whatever
    /// the processor reports.
    pub async fn create_payment(&self, intent: &PaymentIntent) -> ProcessorResult<ExternalPayment> {
        tokio::time::timeout(self.timeout, self.get(intent.processor).create_payment(intent))
            .await
            .map_err(|_| ProcessorError::Timeout(self.timeout))?
    }

    /// Capture a payment, bounded by the configured timeout
    ///
    /// # Errors
    ///
    /// [`ProcessorError::Timeout`] when the bound elapses, otherwise whatever
    /// the processor reports.
    pub async fn capture_payment(
        &self,
        processor: Processor,
        external_ref: &str,
    ) -> ProcessorResult<ProcessorOutcome> {
        tokio::time::timeout(self.timeout, self.get(processor).capture_payment(external_ref))
            .await
            .map_err(|_| ProcessorError::Timeout(self.timeout))?
    }
}
