//! Per-request audit record filled in during verification.

use serde::Serialize;
use tracing::info;

use portcullis_common::{AccountId, RequestId};

/// What the verifier learned about one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestEvent {
    /// Request ID (internal)
    pub request_id: RequestId,
    /// HTTP method, or `POST-as-GET` once a signed read was recognised
    pub method: String,
    /// Endpoint path the request was routed to
    pub endpoint: String,
    /// Authenticated account, set during Key-ID resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<AccountId>,
    /// Contacts of the authenticated account
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,
    /// Internal errors, never shown to the client
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RequestEvent {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Emit the event as one structured log line.
    pub fn log(&self) {
        info!(
            request_id = %self.request_id,
            method = %self.method,
            endpoint = %self.endpoint,
            requester = ?self.requester,
            contacts = ?self.contacts,
            errors = ?self.errors,
            "ACME request"
        );
    }
}
