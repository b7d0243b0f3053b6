//! Wire event types and channel identity.

use serde::{Deserialize, Serialize};

/// The separator joined between, and trailing, every event in a frame.
pub const MESSAGE_SEPARATOR: &str = "\n,,,\n";

/// Identity of a logical broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Classic(String),
    Dynamic { tag: String, instance: String },
}

impl ChannelId {
    /// Parses the wire form: `tag` for classic, `tag=>instance` for dynamic.
    pub fn parse(wire: &str) -> Self {
        match wire.split_once("=>") {
            Some((tag, instance)) => ChannelId::Dynamic {
                tag: tag.to_string(),
                instance: instance.to_string(),
            },
            None => ChannelId::Classic(wire.to_string()),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            ChannelId::Classic(tag) => tag.clone(),
            ChannelId::Dynamic { tag, instance } => format!("{tag}=>{instance}"),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ChannelId::Classic(tag) => tag,
            ChannelId::Dynamic { tag, .. } => tag,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Add,
    Reset,
    Error,
}

/// An event delivered to a subscriber, or about to be.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    pub fn add(channel: &ChannelId, content: impl Into<String>) -> Self {
        Event {
            kind: EventType::Add,
            server: channel.to_wire(),
            content: Some(content.into()),
            message: None,
        }
    }

    pub fn reset(channel: &ChannelId) -> Self {
        Event {
            kind: EventType::Reset,
            server: channel.to_wire(),
            content: None,
            message: None,
        }
    }

    pub fn error(channel_wire: &str, message: impl Into<String>) -> Self {
        Event {
            kind: EventType::Error,
            server: channel_wire.to_string(),
            content: None,
            message: Some(message.into()),
        }
    }

    /// Serializes this event and appends the trailing frame separator.
    pub fn to_framed(&self) -> String {
        let mut s = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize event");
            String::from("{}")
        });
        s.push_str(MESSAGE_SEPARATOR);
        s
    }
}

/// An event internal to a single file's tail, before line-splitting.
#[derive(Debug, Clone)]
pub enum FileEvent {
    Append(Vec<u8>),
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_classic_and_dynamic_wire_forms() {
        assert_eq!(ChannelId::parse("app"), ChannelId::Classic("app".to_string()));
        assert_eq!(
            ChannelId::parse("lobby=>1"),
            ChannelId::Dynamic {
                tag: "lobby".to_string(),
                instance: "1".to_string(),
            }
        );
    }

    #[test]
    fn round_trips_to_wire() {
        let c = ChannelId::Dynamic {
            tag: "lobby".to_string(),
            instance: "1".to_string(),
        };
        assert_eq!(ChannelId::parse(&c.to_wire()), c);
    }

    #[test]
    fn add_event_frames_with_trailing_separator() {
        let evt = Event::add(&ChannelId::Classic("app".to_string()), "hello");
        let framed = evt.to_framed();
        assert!(framed.ends_with(MESSAGE_SEPARATOR));
        assert!(framed.contains("\"type\":\"ADD\""));
        assert!(framed.contains("\"content\":\"hello\""));
    }

    #[test]
    fn reset_event_carries_no_content() {
        let evt = Event::reset(&ChannelId::Classic("app".to_string()));
        let json = serde_json::to_string(&evt).unwrap();
        assert!(!json.contains("content"));
    }
}
