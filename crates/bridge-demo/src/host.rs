//! Host Stand-in
//!
//! Plays the application side of the channel: answers `createEphemeralKey`
//! events and presents authentication challenges on the console.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_core::mock::MockProcessor;
use bridge_core::{
    AuthenticationContext, ChallengeOutcome, HostEvent, KeyRequestId, MethodCall, MethodSender,
    NextAction,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Where the host gets ephemeral keys from
pub enum KeySource {
    /// Merchant backend endpoint minting keys with the secret key
    Backend {
        client: reqwest::Client,
        url: String,
    },
    /// In-memory processor issuing keys for a fixed customer
    Mock {
        processor: Arc<MockProcessor>,
        customer_id: String,
    },
}

impl KeySource {
    async fn fetch(&self, api_version: &str) -> Result<Value, (i64, String)> {
        match self {
            KeySource::Backend { client, url } => {
                let response = client
                    .post(url)
                    .json(&json!({ "api_version": api_version }))
                    .send()
                    .await
                    .map_err(|e| (0, e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err((i64::from(status.as_u16()), message));
                }
                response.json().await.map_err(|e| (0, e.to_string()))
            }
            KeySource::Mock {
                processor,
                customer_id,
            } => Ok(processor.issue_ephemeral_key(customer_id)),
        }
    }
}

/// Answer key requests until the bridge drops its event sender
pub async fn answer_key_requests(
    mut events: UnboundedReceiver<HostEvent>,
    bridge: MethodSender,
    source: KeySource,
) {
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::CreateEphemeralKey {
                api_version,
                request_id,
            } => {
                info!(%request_id, api_version = %api_version, "Host fetching ephemeral key");
                let call = match source.fetch(&api_version).await {
                    Ok(key) => key_update(request_id, key),
                    Err((code, message)) => {
                        warn!(%request_id, code, message = %message, "Ephemeral key fetch failed");
                        key_update_failure(request_id, code, &message)
                    }
                };

                if let Err(e) = bridge.call(call).await {
                    warn!(error = %e, "Bridge stopped before the key reply");
                    return;
                }
            }
        }
    }
}

fn key_update(request_id: KeyRequestId, key: Value) -> MethodCall {
    MethodCall::new(
        "onKeyUpdate",
        json!({ "requestId": request_id.to_string(), "stripeResponseJson": key }),
    )
}

fn key_update_failure(request_id: KeyRequestId, code: i64, message: &str) -> MethodCall {
    MethodCall::new(
        "onKeyUpdateFailure",
        json!({ "requestId": request_id.to_string(), "responseCode": code, "message": message }),
    )
}

/// Shows the challenge and waits for the operator on stdin
pub struct ConsoleAuthenticationContext;

#[async_trait]
impl AuthenticationContext for ConsoleAuthenticationContext {
    async fn present_challenge(&self, intent_id: &str, action: &NextAction) -> ChallengeOutcome {
        match action {
            NextAction::RedirectToUrl { url, .. } => {
                info!(intent_id, url = %url, "Open the URL to authenticate the payment");
            }
            other => info!(intent_id, action = other.kind(), "Authentication required"),
        }
        info!("Press Enter once done, or type 'cancel'");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(0) => ChallengeOutcome::Failed("stdin closed".into()),
            Ok(_) if line.trim().eq_ignore_ascii_case("cancel") => ChallengeOutcome::Canceled,
            Ok(_) => ChallengeOutcome::Completed,
            Err(e) => ChallengeOutcome::Failed(e.to_string()),
        }
    }
}
