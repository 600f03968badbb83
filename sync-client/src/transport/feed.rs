//! Inbound frame decoding and echo suppression.

use optisync_types::{ChannelMessage, ClientId, Event, SyncError};
use serde::de::DeserializeOwned;

/// What an inbound frame means for the local client.
#[derive(Debug)]
pub enum Inbound<P> {
    /// An event from another client, to be reconciled.
    Remote(Event<P>),
    /// A frame this client published itself.
    Echo,
    /// A frame that is not an event broadcast.
    Ignored,
    /// An event frame whose body could not be decoded.
    Malformed(SyncError),
}

/// Classifies realtime frames relative to the local client id.
#[derive(Debug, Clone)]
pub struct RemoteFeed {
    local: ClientId,
}

impl RemoteFeed {
    /// Create a feed for the given local client.
    pub fn new(local: ClientId) -> Self {
        Self { local }
    }

    /// The local client id frames are compared against.
    pub fn local(&self) -> &ClientId {
        &self.local
    }

    /// Decode a frame.
    ///
    /// Echoes are detected from the transport's publisher id before the body
    /// is parsed, and again from the event's origin afterwards.
    pub fn decode<P: DeserializeOwned>(&self, message: &ChannelMessage) -> Inbound<P> {
        if !message.is_event() {
            return Inbound::Ignored;
        }
        if message.client_id.as_ref() == Some(&self.local) {
            return Inbound::Echo;
        }
        match Event::<P>::from_json_str(&message.data) {
            Ok(event) if event.origin == self.local => Inbound::Echo,
            Ok(event) => Inbound::Remote(event),
            Err(e) => Inbound::Malformed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn local() -> ClientId {
        ClientId::new("client_local").unwrap()
    }

    fn other() -> ClientId {
        ClientId::new("client_other").unwrap()
    }

    fn frame_for(event: &Event<Value>, publisher: Option<ClientId>) -> ChannelMessage {
        let mut frame = ChannelMessage::for_event(event, 10).unwrap();
        frame.client_id = publisher;
        frame
    }

    #[test]
    fn remote_event_is_decoded() {
        let feed = RemoteFeed::new(local());
        let event = Event::new(json!({"value": 10}), other(), 5);

        match feed.decode::<Value>(&frame_for(&event, Some(other()))) {
            Inbound::Remote(decoded) => assert_eq!(decoded, event),
            other => panic!("expected remote event, got {other:?}"),
        }
    }

    #[test]
    fn echo_detected_by_publisher_id() {
        let feed = RemoteFeed::new(local());
        let frame = ChannelMessage {
            name: "event".into(),
            data: "not even json".into(),
            timestamp: 1,
            client_id: Some(local()),
        };
        assert!(matches!(feed.decode::<Value>(&frame), Inbound::Echo));
    }

    #[test]
    fn echo_detected_by_event_origin() {
        let feed = RemoteFeed::new(local());
        let event = Event::new(json!({"value": 1}), local(), 5);
        assert!(matches!(
            feed.decode::<Value>(&frame_for(&event, None)),
            Inbound::Echo
        ));
    }

    #[test]
    fn other_frame_names_are_ignored() {
        let feed = RemoteFeed::new(local());
        let frame = ChannelMessage {
            name: "presence".into(),
            data: "{}".into(),
            timestamp: 1,
            client_id: Some(other()),
        };
        assert!(matches!(feed.decode::<Value>(&frame), Inbound::Ignored));
    }

    #[test]
    fn malformed_body_is_reported() {
        let feed = RemoteFeed::new(local());
        let frame = ChannelMessage {
            name: "event".into(),
            data: "{\"id\": 42".into(),
            timestamp: 1,
            client_id: Some(other()),
        };
        assert!(matches!(
            feed.decode::<Value>(&frame),
            Inbound::Malformed(SyncError::Serialization(_))
        ));
    }

    #[test]
    fn legacy_origin_field_is_accepted() {
        let feed = RemoteFeed::new(local());
        let id = optisync_types::EventId::new();
        let frame = ChannelMessage {
            name: "event".into(),
            data: json!({
                "id": id.to_string(),
                "payload": {"value": 2},
                "timestamp": 7,
                "originId": "client_other",
                "status": "PENDING"
            })
            .to_string(),
            timestamp: 1,
            client_id: None,
        };
        match feed.decode::<Value>(&frame) {
            Inbound::Remote(event) => {
                assert_eq!(event.id, id);
                assert_eq!(event.origin, other());
                assert_eq!(event.retry_attempts, 0);
            }
            other => panic!("expected remote event, got {other:?}"),
        }
    }
}
