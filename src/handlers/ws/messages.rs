//! WebSocket wire protocol.
//!
//! JSON text frames carry control and events, tagged by a `type` field with
//! camelCase payload fields; binary frames are raw audio and never appear
//! here. Synthesized audio travels client-ward as base64 inside `tts_audio`
//! events so a single ordered text channel carries the whole conversation.

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Messages received from clients over WebSocket
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// First message on every connection: authenticate and open the session
    #[serde(rename_all = "camelCase")]
    SessionStart {
        auth_token: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// Keepalive
    Ping,
    /// Graceful end of session
    Close,
}

/// Messages sent to clients over WebSocket
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// Sent immediately after the socket upgrade, carrying the id the
    /// session will take if `session_start` succeeds
    #[serde(rename_all = "camelCase")]
    Connected { session_id: String },
    /// Session is live; audio will now be accepted
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: String,
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    Pong { timestamp: u64 },
    /// Interim transcript; superseded by later events
    PartialTranscript { text: String, confidence: f32 },
    /// Utterance-final transcript that triggers a response turn
    FinalTranscript { text: String, confidence: f32 },
    /// Periodic ack carrying the total accepted audio bytes
    AudioReceived { bytes: u64 },
    /// A response turn has started
    AiThinking,
    /// One incremental response token
    #[serde(rename_all = "camelCase")]
    AiResponseChunk { text: String, full_text: String },
    /// Full response text once the stream ends
    #[serde(rename_all = "camelCase")]
    AiResponseComplete { text: String, latency_ms: u64 },
    /// One synthesized sentence, emitted in sentence-index order
    #[serde(rename_all = "camelCase")]
    TtsAudio {
        #[serde(with = "base64_audio")]
        audio: Vec<u8>,
        text: String,
        index: u64,
        latency_ms: u64,
    },
    /// Soft budget warning, sent at most once per session
    Warning {
        code: String,
        message: String,
        cost: f64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl OutgoingMessage {
    pub fn error(err: &SessionError) -> Self {
        OutgoingMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            recoverable: !err.is_fatal(),
        }
    }

    pub fn budget_warning(cost: f64) -> Self {
        OutgoingMessage::Warning {
            code: "BUDGET_WARNING".to_string(),
            message: format!("Session cost ${cost:.4} is approaching the budget limit"),
            cost,
        }
    }
}

/// What the socket sender task should do next. Events keep their submission
/// order on the channel; `Close` ends the connection after flushing.
#[derive(Debug, Clone, PartialEq)]
pub enum WsOutbound {
    Event(OutgoingMessage),
    Close { code: u16, reason: String },
}

impl From<OutgoingMessage> for WsOutbound {
    fn from(msg: OutgoingMessage) -> Self {
        WsOutbound::Event(msg)
    }
}

/// Base64 (standard alphabet) codec for audio payloads
mod base64_audio {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    #[allow(dead_code)]
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_start_deserializes() {
        let msg: IncomingMessage = serde_json::from_value(json!({
            "type": "session_start",
            "authToken": "tok-123",
            "conversationId": "conv-9"
        }))
        .unwrap();
        assert_eq!(
            msg,
            IncomingMessage::SessionStart {
                auth_token: "tok-123".to_string(),
                conversation_id: Some("conv-9".to_string()),
            }
        );
    }

    #[test]
    fn test_session_start_conversation_id_optional() {
        let msg: IncomingMessage = serde_json::from_value(json!({
            "type": "session_start",
            "authToken": "tok-123"
        }))
        .unwrap();
        assert!(matches!(
            msg,
            IncomingMessage::SessionStart {
                conversation_id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<IncomingMessage, _> =
            serde_json::from_value(json!({"type": "mystery"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_tts_audio_serializes_base64_and_camel_case() {
        let msg = OutgoingMessage::TtsAudio {
            audio: vec![1, 2, 3, 4],
            text: "Hello there.".to_string(),
            index: 2,
            latency_ms: 140,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "tts_audio");
        assert_eq!(value["audio"], "AQIDBA==");
        assert_eq!(value["index"], 2);
        assert_eq!(value["latencyMs"], 140);
    }

    #[test]
    fn test_response_chunk_uses_full_text_field() {
        let msg = OutgoingMessage::AiResponseChunk {
            text: " world".to_string(),
            full_text: "hello world".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ai_response_chunk");
        assert_eq!(value["fullText"], "hello world");
    }

    #[test]
    fn test_error_event_carries_code_and_recoverability() {
        let fatal = OutgoingMessage::error(&SessionError::BudgetExceeded {
            cost: 1.2,
            ceiling: 1.0,
        });
        let value = serde_json::to_value(&fatal).unwrap();
        assert_eq!(value["code"], "BUDGET_EXCEEDED");
        assert_eq!(value["recoverable"], false);

        let soft = OutgoingMessage::error(&SessionError::Stt("hiccup".to_string()));
        let value = serde_json::to_value(&soft).unwrap();
        assert_eq!(value["code"], "STT_ERROR");
        assert_eq!(value["recoverable"], true);
    }

    #[test]
    fn test_session_started_omits_absent_conversation() {
        let msg = OutgoingMessage::SessionStarted {
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            conversation_id: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "session_started");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["userId"], "u1");
        assert!(value.get("conversationId").is_none());
    }

    #[test]
    fn test_budget_warning_carries_code_and_cost() {
        let value = serde_json::to_value(OutgoingMessage::budget_warning(0.85)).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["code"], "BUDGET_WARNING");
        assert!((value["cost"].as_f64().unwrap() - 0.85).abs() < 1e-9);
    }
}
