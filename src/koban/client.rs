//! Koban CRM client.
//!
//! One client is built per workflow run so every request it logs carries the
//! workflow id.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::KobanSettings;

use super::error::KobanError;
use super::retry_policy::RequestRetryPolicy;
use super::transport::{KobanRequest, KobanResponse, KobanTransport};

/// Classified body of a successful HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum KobanPayload {
    Json(Value),
    Pdf(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Json,
    Pdf,
}

#[derive(Clone)]
pub struct KobanClient {
    transport: Arc<dyn KobanTransport>,
    base_url: String,
    retry_policy: RequestRetryPolicy,
    workflow_id: String,
}

impl KobanClient {
    pub fn new(
        transport: Arc<dyn KobanTransport>,
        settings: &KobanSettings,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            retry_policy: RequestRetryPolicy::new(settings),
            workflow_id: workflow_id.into(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    // =========================================================================
    // Thirds
    // =========================================================================

    /// Look up a third by e-mail. A 404 means there is none.
    pub async fn find_third_by_email(&self, email: &str) -> Result<Option<String>, KobanError> {
        let url = format!(
            "{}/ncThird/GetOneByKey?uniqueproperty=Email&value={}",
            self.base_url,
            urlencoding::encode(email)
        );
        match self.execute(KobanRequest::get(url), Expect::Json).await {
            Ok(payload) => Ok(payload
                .as_json()
                .and_then(|body| body.get("Guid"))
                .and_then(Value::as_str)
                .filter(|guid| !guid.is_empty())
                .map(str::to_string)),
            Err(KobanError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or update a third, keyed on its `Extcode`. Returns its guid.
    pub async fn upsert_third(&self, payload: &Value) -> Result<String, KobanError> {
        let url = format!("{}/ncThird/PostOne?uniqueproperty=Extcode", self.base_url);
        let body = self.post_json(url, payload).await?;
        result_guid(&body)
    }

    // =========================================================================
    // Invoices and payments
    // =========================================================================

    pub async fn create_invoice(&self, payload: &Value) -> Result<String, KobanError> {
        let url = format!(
            "{}/ncInvoice/PostMany?uniqueproperty=Number&orderuniqueproperty=Number&thirduniqueproperty=Guid",
            self.base_url
        );
        let body = self.post_json(url, payload).await?;
        result_guid(&body)
    }

    pub async fn create_payment(&self, payload: &Value) -> Result<String, KobanError> {
        let url = format!(
            "{}/ncPayment/PostMany?uniqueproperty=Number&invoiceuniqueproperty=Guid",
            self.base_url
        );
        let body = self.post_json(url, payload).await?;
        body.get("Result")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(KobanError::MissingResult)
    }

    /// Download the PDF rendering of an invoice.
    pub async fn get_invoice_pdf(&self, invoice_guid: &str) -> Result<Vec<u8>, KobanError> {
        let url = format!(
            "{}/ncInvoice/GetPDF?id={}",
            self.base_url,
            urlencoding::encode(invoice_guid)
        );
        match self.execute(KobanRequest::get(url), Expect::Pdf).await? {
            KobanPayload::Pdf(bytes) => Ok(bytes),
            KobanPayload::Json(_) => Err(KobanError::NotAPdf),
        }
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Create a product keyed on its `Reference`. Returns its guid.
    pub async fn create_product(&self, payload: &Value) -> Result<String, KobanError> {
        let url = format!(
            "{}/ncProduct/PostOne?uniqueproperty=Reference&catproductuniqueproperty=Reference",
            self.base_url
        );
        let body = self.post_json(url, payload).await?;
        result_guid(&body)
    }

    /// Update a product already known by `Guid`.
    pub async fn update_product(&self, payload: &Value) -> Result<(), KobanError> {
        let url = format!(
            "{}/ncProduct/PostOne?uniqueproperty=Guid&catproductuniqueproperty=Reference",
            self.base_url
        );
        self.post_json(url, payload).await?;
        Ok(())
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// POST a JSON body and require `Success: true` in the answer.
    async fn post_json(&self, url: String, payload: &Value) -> Result<Value, KobanError> {
        let payload = self
            .execute(KobanRequest::post(url, payload.clone()), Expect::Json)
            .await?;
        let body = match payload {
            KobanPayload::Json(body) => body,
            KobanPayload::Pdf(_) => {
                return Err(KobanError::InvalidJson(
                    "expected JSON, got a PDF document".to_string(),
                ))
            }
        };

        if body.get("Success").and_then(Value::as_bool) != Some(true) {
            let message = body
                .get("Message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            return Err(KobanError::Rejected(message));
        }
        Ok(body)
    }

    /// Send a request with retries, then classify the answer.
    async fn execute(
        &self,
        request: KobanRequest,
        expect: Expect,
    ) -> Result<KobanPayload, KobanError> {
        let mut attempt = 1;
        let body = request
            .body
            .as_ref()
            .map(serde_json::Value::to_string)
            .unwrap_or_default();
        loop {
            debug!(
                workflow_id = %self.workflow_id,
                method = request.method.as_str(),
                url = %request.url,
                attempt,
                body = %body,
                "Koban request"
            );

            let result = match self.transport.send(request.clone()).await {
                Ok(response) => {
                    debug!(
                        workflow_id = %self.workflow_id,
                        status = response.status,
                        content_type = response.content_type.as_deref().unwrap_or(""),
                        bytes = response.body.len(),
                        "Koban response"
                    );
                    classify(response, expect)
                }
                Err(e) => Err(KobanError::from(e)),
            };

            match result {
                Ok(payload) => return Ok(payload),
                Err(e) if self.retry_policy.should_retry(&e, attempt) => {
                    let delay = self.retry_policy.backoff(attempt);
                    warn!(
                        workflow_id = %self.workflow_id,
                        url = %request.url,
                        attempt,
                        "Koban call failed ({}), retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl KobanPayload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            KobanPayload::Json(value) => Some(value),
            KobanPayload::Pdf(_) => None,
        }
    }
}

/// Map a raw response to a payload or an error.
///
/// Content type is checked before status, so an HTML error page is reported
/// as such whatever its status code.
fn classify(response: KobanResponse, expect: Expect) -> Result<KobanPayload, KobanError> {
    let content_type = response
        .content_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("application/pdf") {
        return Ok(KobanPayload::Pdf(response.body));
    }
    if content_type.contains("html") {
        return Err(KobanError::HtmlResponse);
    }
    if response.status == 404 {
        return Err(KobanError::NotFound);
    }
    if !(200..300).contains(&response.status) {
        return Err(KobanError::UnexpectedStatus {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    if expect == Expect::Pdf {
        return Err(KobanError::NotAPdf);
    }

    serde_json::from_slice(&response.body)
        .map(KobanPayload::Json)
        .map_err(|e| KobanError::InvalidJson(e.to_string()))
}

/// `Result` as a guid: either a plain string or the first element of an array.
fn result_guid(body: &Value) -> Result<String, KobanError> {
    let result = match body.get("Result") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    result
        .and_then(Value::as_str)
        .filter(|guid| !guid.is_empty())
        .map(str::to_string)
        .ok_or(KobanError::MissingResult)
}
