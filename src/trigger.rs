//! Continuation triggers: how one invocation starts the next.
//!
//! `HttpTrigger` re-invokes the service's own run endpoint with the next
//! cursor. The request is spawned and never awaited by the caller; the
//! current invocation does not wait on the next one.

use std::time::Duration;

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::TriggerError;
use crate::pipeline::types::ContinuationTrigger;

/// Path of the run endpoint, relative to the public base URL.
pub const RUN_PATH: &str = "/api/digests/run";

pub struct HttpTrigger {
    client: reqwest::Client,
    endpoint: Url,
    secret: SecretString,
}

impl HttpTrigger {
    pub fn new(public_url: &str, secret: SecretString) -> Result<Self, TriggerError> {
        let base = Url::parse(public_url).map_err(|e| TriggerError::InvalidUrl(format!("{public_url}: {e}")))?;
        let endpoint = base
            .join(RUN_PATH)
            .map_err(|e| TriggerError::InvalidUrl(format!("{public_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TriggerError::InvalidUrl(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            secret,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ContinuationTrigger for HttpTrigger {
    fn fire(&self, cursor: usize) -> Result<(), TriggerError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| TriggerError::NoRuntime)?;

        let request = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.secret.expose_secret())
            .json(&json!({ "cursor": cursor }));
        let endpoint = self.endpoint.clone();

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(cursor, status = %response.status(), "Continuation accepted");
                }
                Ok(response) => {
                    warn!(cursor, %endpoint, status = %response.status(), "Continuation rejected");
                }
                Err(e) => {
                    warn!(cursor, %endpoint, error = %e, "Continuation request failed");
                }
            }
        });
        Ok(())
    }
}

/// Trigger used when no public URL is configured. Chains stall visibly.
pub struct DisabledTrigger;

impl ContinuationTrigger for DisabledTrigger {
    fn fire(&self, _cursor: usize) -> Result<(), TriggerError> {
        Err(TriggerError::NotConfigured)
    }
}
