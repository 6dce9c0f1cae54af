//! Chat transport (Slack Web API) and request signature verification

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use draftflow_common::config::SlackConfig;
use draftflow_common::{Result, WorkflowError};

type HmacSha256 = Hmac<Sha256>;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// How far a request timestamp may drift before the signature is rejected.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 60 * 5;

/// Chat transport contract. Returns the posted message's ts.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<Value>,
        thread_ts: Option<&str>,
    ) -> Result<String>;
}

/// Slack Web API implementation.
pub struct SlackClient {
    client: reqwest::Client,
    bot_token: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(WorkflowError::Http)?;
        Ok(Self {
            client,
            bot_token: config.bot_token.clone(),
        })
    }
}

#[async_trait]
impl ChatTransport for SlackClient {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<Value>,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
        });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks;
        }
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = json!(ts);
        }

        let resp = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkflowError::ChatTransport {
                message: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(WorkflowError::ChatRateLimited { retry_after_secs });
        }
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::ChatTransport {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let data: Value = resp.json().await.map_err(|e| WorkflowError::ChatTransport {
            message: format!("invalid json response: {e}"),
        })?;

        if !data.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let api_error = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(WorkflowError::ChatTransport {
                message: api_error.to_string(),
            });
        }

        Ok(data
            .get("ts")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string())
    }
}

/// Compute the `v0=` request signature for a timestamp and raw body.
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a request signature against the raw body.
///
/// `now_unix` is injected for testability; the timestamp must be within
/// [`SIGNATURE_TOLERANCE_SECS`] of it. Comparison of the digest itself is
/// constant-time via the MAC verifier.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_unix: i64,
) -> bool {
    if signing_secret.is_empty() || timestamp.is_empty() || signature.is_empty() {
        return false;
    }

    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now_unix - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    let Some(hex_digest) = signature.strip_prefix("v0=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// [`verify_signature`] against the system clock.
pub fn verify_signature_now(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
) -> bool {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    verify_signature(signing_secret, timestamp, body, signature, now)
}
