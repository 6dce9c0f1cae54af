//! Slack ingress handlers
//!
//! Both endpoints verify the request signature against the raw body before
//! any parsing, and acknowledge within Slack's 3-second window by spawning
//! the actual work in the background. Slack retries delivery on its own
//! schedule; retried requests (marked by `X-Slack-Retry-Num`) are
//! acknowledged without reprocessing.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use draftflow_clients::slack::verify_signature_now;
use draftflow_common::domain::ChatAction;
use draftflow_engine::spawn::spawn_unit;

use crate::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn verified(state: &AppState, headers: &HeaderMap, body: &[u8]) -> bool {
    verify_signature_now(
        &state.config.slack.signing_secret,
        header(headers, "x-slack-request-timestamp"),
        body,
        header(headers, "x-slack-signature"),
    )
}

fn is_retry(headers: &HeaderMap) -> bool {
    !header(headers, "x-slack-retry-num").is_empty()
}

/// Interactivity payload (the `payload` form field, JSON-encoded).
#[derive(Deserialize)]
struct InteractionPayload {
    #[serde(default)]
    channel: Option<ChannelRef>,
    #[serde(default)]
    message: Option<MessageRef>,
    #[serde(default)]
    actions: Vec<InteractionAction>,
}

#[derive(Deserialize)]
struct ChannelRef {
    id: String,
}

#[derive(Deserialize)]
struct MessageRef {
    ts: String,
}

#[derive(Deserialize)]
struct InteractionAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    selected_option: Option<SelectedOption>,
}

#[derive(Deserialize)]
struct SelectedOption {
    value: String,
}

#[derive(Deserialize)]
struct ActionForm {
    payload: String,
}

/// Normalize the first action of an interaction into a [`ChatAction`].
/// Buttons carry `value`; static selects carry `selected_option.value`.
fn extract_action(payload: InteractionPayload) -> Option<ChatAction> {
    let channel_id = payload.channel.map(|c| c.id)?;
    let message_ts = payload.message.map(|m| m.ts).unwrap_or_default();
    let action = payload.actions.into_iter().next()?;
    let value = action
        .selected_option
        .map(|o| o.value)
        .or(action.value)
        .unwrap_or_default();
    Some(ChatAction {
        action_id: action.action_id,
        value,
        channel_id,
        message_ts,
    })
}

/// Interactivity endpoint: block actions (buttons, static selects).
pub async fn actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !verified(&state, &headers, &body) {
        return StatusCode::UNAUTHORIZED;
    }
    if is_retry(&headers) {
        return StatusCode::OK;
    }

    let form: ActionForm = match serde_urlencoded::from_bytes(&body) {
        Ok(form) => form,
        Err(e) => {
            tracing::warn!(error = %e, "malformed interaction form");
            return StatusCode::OK;
        }
    };
    let payload: InteractionPayload = match serde_json::from_str(&form.payload) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "malformed interaction payload");
            return StatusCode::OK;
        }
    };

    if let Some(action) = extract_action(payload) {
        let engine = state.engine.clone();
        spawn_unit("process_action", async move {
            engine.process_action(action).await;
        });
    }
    StatusCode::OK
}

/// Events API payload envelope.
#[derive(Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<MessageEvent>,
}

#[derive(Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
}

/// A human thread reply worth routing: a plain user message posted into a
/// thread. Bot messages and subtyped messages (edits, joins) are dropped.
fn thread_reply(event: MessageEvent) -> Option<(String, String)> {
    if event.kind != "message" || event.bot_id.is_some() || event.subtype.is_some() {
        return None;
    }
    let thread_ts = event.thread_ts?;
    let text = event.text.unwrap_or_default();
    Some((thread_ts, text))
}

/// Events endpoint: URL verification handshake and thread replies.
pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if !verified(&state, &headers, &body) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "malformed event payload");
            return (StatusCode::OK, Json(json!({})));
        }
    };

    if envelope.kind == "url_verification" {
        let challenge = envelope.challenge.unwrap_or_default();
        return (StatusCode::OK, Json(json!({ "challenge": challenge })));
    }

    if is_retry(&headers) {
        return (StatusCode::OK, Json(json!({})));
    }

    if let Some((thread_ts, text)) = envelope.event.and_then(thread_reply) {
        let engine = state.engine.clone();
        spawn_unit("process_thread_message", async move {
            engine.process_thread_message(&thread_ts, &text).await;
        });
    }
    (StatusCode::OK, Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(json: &str) -> InteractionPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extract_button_action() {
        let payload = interaction(
            r#"{
                "channel": {"id": "C012345"},
                "message": {"ts": "1700000000.000100"},
                "actions": [{"action_id": "approve_outline", "value": "{\"article_id\":\"ART-1\"}"}]
            }"#,
        );
        let action = extract_action(payload).unwrap();
        assert_eq!(action.action_id, "approve_outline");
        assert_eq!(action.value, r#"{"article_id":"ART-1"}"#);
        assert_eq!(action.channel_id, "C012345");
        assert_eq!(action.message_ts, "1700000000.000100");
    }

    #[test]
    fn test_extract_select_action_prefers_selected_option() {
        let payload = interaction(
            r#"{
                "channel": {"id": "C012345"},
                "actions": [{
                    "action_id": "select_paper",
                    "selected_option": {"value": "{\"article_id\":\"ART-1\",\"pmid\":\"11111111\"}"}
                }]
            }"#,
        );
        let action = extract_action(payload).unwrap();
        assert_eq!(action.action_id, "select_paper");
        assert!(action.value.contains("11111111"));
        assert_eq!(action.message_ts, "");
    }

    #[test]
    fn test_extract_requires_channel_and_action() {
        let no_channel = interaction(r#"{"actions": [{"action_id": "retry"}]}"#);
        assert!(extract_action(no_channel).is_none());
        let no_actions = interaction(r#"{"channel": {"id": "C012345"}, "actions": []}"#);
        assert!(extract_action(no_actions).is_none());
    }

    fn message(json: &str) -> MessageEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_thread_reply_accepts_plain_thread_message() {
        let event = message(
            r#"{"type": "message", "text": "修正して", "thread_ts": "1700000000.000100"}"#,
        );
        let (ts, text) = thread_reply(event).unwrap();
        assert_eq!(ts, "1700000000.000100");
        assert_eq!(text, "修正して");
    }

    #[test]
    fn test_thread_reply_drops_bot_and_subtyped_messages() {
        let bot = message(
            r#"{"type": "message", "bot_id": "B01", "thread_ts": "1700000000.000100"}"#,
        );
        assert!(thread_reply(bot).is_none());
        let edited = message(
            r#"{"type": "message", "subtype": "message_changed", "thread_ts": "1700000000.000100"}"#,
        );
        assert!(thread_reply(edited).is_none());
        let top_level = message(r#"{"type": "message", "text": "hello"}"#);
        assert!(thread_reply(top_level).is_none());
    }
}
