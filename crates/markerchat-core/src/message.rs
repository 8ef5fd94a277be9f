//! Wire message model.
//!
//! Every payload exchanged with the chat server is one JSON object carrying a
//! `type` tag. Inbound frames go through [`Message::classify`], which never
//! panics; callers that must not fail use [`Message::parse_lenient`], which
//! downgrades anything unrecognised to a generic `system_notification`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Body of the notification that replaces a payload we could not classify.
pub const MALFORMED_BODY: &str = "Received a message that could not be displayed.";

/// The closed set of `type` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTag {
    History,
    NewMessage,
    UserMessage,
    AnimalResponse,
    System,
    SystemNotification,
}

impl MessageTag {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageTag::History => "history",
            MessageTag::NewMessage => "new_message",
            MessageTag::UserMessage => "user_message",
            MessageTag::AnimalResponse => "animal_response",
            MessageTag::System => "system",
            MessageTag::SystemNotification => "system_notification",
        }
    }

    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "history" => Some(MessageTag::History),
            "new_message" => Some(MessageTag::NewMessage),
            "user_message" => Some(MessageTag::UserMessage),
            "animal_response" => Some(MessageTag::AnimalResponse),
            "system" => Some(MessageTag::System),
            "system_notification" => Some(MessageTag::SystemNotification),
            _ => None,
        }
    }

    /// Connection-lifecycle and error notices.
    pub fn is_system(self) -> bool {
        matches!(self, MessageTag::System | MessageTag::SystemNotification)
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire message. Serializes to the JSON shape the server expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Full transcript replacement.
    History { data: Vec<Message> },
    /// One incremental chat line from the shared room.
    NewMessage {
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        message: String,
    },
    /// Human-authored message, optionally scoped to a marker subject.
    UserMessage {
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        animal: Option<String>,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_key: Option<String>,
    },
    /// Counterpart reply scoped to a named subject.
    AnimalResponse { animal: String, content: String },
    System { content: String },
    SystemNotification { content: String },
}

/// Why an inbound payload could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no `type` tag")]
    MissingTag,
    #[error("unknown message type {0:?}")]
    UnknownTag(String),
    #[error("{tag} message is missing `{field}`")]
    MissingField { tag: MessageTag, field: &'static str },
    #[error("field has the wrong shape: {0}")]
    BadField(String),
}

/// Loose view of a payload: every field any tag may carry.
#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    tag: Option<String>,
    username: Option<String>,
    animal: Option<String>,
    content: Option<String>,
    message: Option<String>,
    content_key: Option<String>,
    data: Option<Vec<Value>>,
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::History { .. } => MessageTag::History,
            Message::NewMessage { .. } => MessageTag::NewMessage,
            Message::UserMessage { .. } => MessageTag::UserMessage,
            Message::AnimalResponse { .. } => MessageTag::AnimalResponse,
            Message::System { .. } => MessageTag::System,
            Message::SystemNotification { .. } => MessageTag::SystemNotification,
        }
    }

    pub fn system_notification(content: impl Into<String>) -> Self {
        Message::SystemNotification {
            content: content.into(),
        }
    }

    /// The generic notice used in place of a malformed payload.
    pub fn malformed() -> Self {
        Message::system_notification(MALFORMED_BODY)
    }

    /// Classify one text frame.
    pub fn classify(text: &str) -> Result<Message, MalformedMessage> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MalformedMessage::InvalidJson(e.to_string()))?;
        Message::from_value(value, None)
    }

    /// Classify one text frame, downgrading failures to [`Message::malformed`].
    pub fn parse_lenient(text: &str) -> Message {
        Message::classify(text).unwrap_or_else(|_| Message::malformed())
    }

    /// Classify a decoded JSON value. `default_tag` applies when the object has
    /// no `type` field (stored history rows carry none).
    pub fn from_value(value: Value, default_tag: Option<MessageTag>) -> Result<Message, MalformedMessage> {
        if !value.is_object() {
            return Err(MalformedMessage::NotAnObject);
        }
        let raw: RawMessage =
            serde_json::from_value(value).map_err(|e| MalformedMessage::BadField(e.to_string()))?;

        let tag = match raw.tag.as_deref() {
            Some(t) => MessageTag::from_wire(t).ok_or_else(|| MalformedMessage::UnknownTag(t.to_string()))?,
            None => default_tag.ok_or(MalformedMessage::MissingTag)?,
        };

        let missing = |field: &'static str| MalformedMessage::MissingField { tag, field };

        match tag {
            MessageTag::History => {
                let data = raw.data.ok_or_else(|| missing("data"))?;
                // A bad row is downgraded on its own; the rest of the history survives.
                let data = data
                    .into_iter()
                    .map(|row| {
                        Message::from_value(row, Some(MessageTag::NewMessage))
                            .unwrap_or_else(|_| Message::malformed())
                    })
                    .collect();
                Ok(Message::History { data })
            }
            MessageTag::NewMessage => {
                let message = raw.message.or(raw.content).ok_or_else(|| missing("message"))?;
                Ok(Message::NewMessage {
                    username: raw.username,
                    message,
                })
            }
            MessageTag::UserMessage => {
                if raw.username.is_none() && raw.animal.is_none() {
                    return Err(missing("username"));
                }
                let content = raw.content.or(raw.message).ok_or_else(|| missing("content"))?;
                Ok(Message::UserMessage {
                    username: raw.username,
                    animal: raw.animal,
                    content,
                    content_key: raw.content_key,
                })
            }
            MessageTag::AnimalResponse => Ok(Message::AnimalResponse {
                animal: raw.animal.ok_or_else(|| missing("animal"))?,
                content: raw.content.ok_or_else(|| missing("content"))?,
            }),
            MessageTag::System => Ok(Message::System {
                content: raw.content.ok_or_else(|| missing("content"))?,
            }),
            MessageTag::SystemNotification => Ok(Message::SystemNotification {
                content: raw.content.ok_or_else(|| missing("content"))?,
            }),
        }
    }

    /// Encode as one JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
