//! Wire frames (§6): positional JSON arrays, not struct-tagged objects.
//! Hand-rolled `Serialize`/`Deserialize` because `serde_json::Value`'s
//! array shape does not map onto `#[serde(tag = "...")]`.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::event::EventRecord;
use super::filter::Filter;
use super::subscription::SubId;

/// Frames a connection may send (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Event(EventRecord),
    Req(SubId, Vec<Filter>),
    Close(SubId),
}

/// Frames the relay may send (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Ok {
        id: String,
        accepted: bool,
        message: String,
    },
    Event {
        sub_id: SubId,
        event: EventRecord,
    },
    Eose {
        sub_id: SubId,
    },
    Closed {
        sub_id: SubId,
        reason: String,
    },
    Notice {
        message: String,
    },
}

impl Serialize for ClientFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientFrame::Event(ev) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(ev)?;
                seq.end()
            }
            ClientFrame::Req(sub_id, filters) => {
                let mut seq = serializer.serialize_seq(Some(2 + filters.len()))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(sub_id)?;
                for f in filters {
                    seq.serialize_element(f)?;
                }
                seq.end()
            }
            ClientFrame::Close(sub_id) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("CLOSE")?;
                seq.serialize_element(sub_id)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ClientFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values: Vec<Value> = Deserialize::deserialize(deserializer)?;
        let mut iter = values.into_iter();
        let label = iter
            .next()
            .ok_or_else(|| de::Error::custom("empty frame"))?;
        let label = label
            .as_str()
            .ok_or_else(|| de::Error::custom("frame label must be a string"))?;
        match label {
            "EVENT" => {
                let ev = iter
                    .next()
                    .ok_or_else(|| de::Error::custom("EVENT frame missing event body"))?;
                let record: EventRecord =
                    serde_json::from_value(ev).map_err(de::Error::custom)?;
                Ok(ClientFrame::Event(record))
            }
            "REQ" => {
                let sub_id: SubId = iter
                    .next()
                    .ok_or_else(|| de::Error::custom("REQ frame missing subscription id"))
                    .and_then(|v| serde_json::from_value(v).map_err(de::Error::custom))?;
                let filters = iter
                    .map(|v| serde_json::from_value(v).map_err(de::Error::custom))
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientFrame::Req(sub_id, filters))
            }
            "CLOSE" => {
                let sub_id: SubId = iter
                    .next()
                    .ok_or_else(|| de::Error::custom("CLOSE frame missing subscription id"))
                    .and_then(|v| serde_json::from_value(v).map_err(de::Error::custom))?;
                Ok(ClientFrame::Close(sub_id))
            }
            other => Err(de::Error::custom(format!("unknown frame label {other}"))),
        }
    }
}

impl Serialize for RelayMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RelayMessage::Ok {
                id,
                accepted,
                message,
            } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("OK")?;
                seq.serialize_element(id)?;
                seq.serialize_element(accepted)?;
                seq.serialize_element(message)?;
                seq.end()
            }
            RelayMessage::Event { sub_id, event } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(sub_id)?;
                seq.serialize_element(event)?;
                seq.end()
            }
            RelayMessage::Eose { sub_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EOSE")?;
                seq.serialize_element(sub_id)?;
                seq.end()
            }
            RelayMessage::Closed { sub_id, reason } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("CLOSED")?;
                seq.serialize_element(sub_id)?;
                seq.serialize_element(reason)?;
                seq.end()
            }
            RelayMessage::Notice { message } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("NOTICE")?;
                seq.serialize_element(message)?;
                seq.end()
            }
        }
    }
}

struct RelayMessageVisitor;

impl<'de> Visitor<'de> for RelayMessageVisitor {
    type Value = RelayMessage;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a relay message array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let label: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::custom("empty frame"))?;
        match label.as_str() {
            "OK" => {
                let id = next(&mut seq, "OK id")?;
                let accepted = next(&mut seq, "OK accepted")?;
                let message = next(&mut seq, "OK message")?;
                Ok(RelayMessage::Ok {
                    id,
                    accepted,
                    message,
                })
            }
            "EVENT" => {
                let sub_id = next(&mut seq, "EVENT sub_id")?;
                let event = next(&mut seq, "EVENT body")?;
                Ok(RelayMessage::Event { sub_id, event })
            }
            "EOSE" => {
                let sub_id = next(&mut seq, "EOSE sub_id")?;
                Ok(RelayMessage::Eose { sub_id })
            }
            "CLOSED" => {
                let sub_id = next(&mut seq, "CLOSED sub_id")?;
                let reason = next(&mut seq, "CLOSED reason")?;
                Ok(RelayMessage::Closed { sub_id, reason })
            }
            "NOTICE" => {
                let message = next(&mut seq, "NOTICE message")?;
                Ok(RelayMessage::Notice { message })
            }
            other => Err(de::Error::custom(format!("unknown frame label {other}"))),
        }
    }
}

fn next<'de, A: SeqAccess<'de>, T: Deserialize<'de>>(
    seq: &mut A,
    what: &'static str,
) -> Result<T, A::Error> {
    seq.next_element()?
        .ok_or_else(|| de::Error::custom(format!("missing {what}")))
}

impl<'de> Deserialize<'de> for RelayMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_seq(RelayMessageVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::EventRecord;

    fn sample_event() -> EventRecord {
        EventRecord {
            id: "0".repeat(64),
            pubkey: "1".repeat(64),
            created_at: 100,
            kind: 1,
            tags: vec![],
            content: "hi".to_owned(),
            sig: "2".repeat(128),
        }
    }

    #[test]
    fn req_frame_round_trips() {
        let frame = ClientFrame::Req("sub1".to_owned(), vec![Filter::default()]);
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, parsed);
    }

    #[test]
    fn event_frame_parses_positional_array() {
        let json = serde_json::to_string(&serde_json::json!(["EVENT", sample_event()])).unwrap();
        let frame: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, ClientFrame::Event(sample_event()));
    }

    #[test]
    fn close_frame_parses() {
        let json = r#"["CLOSE", "sub1"]"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame, ClientFrame::Close("sub1".to_owned()));
    }

    #[test]
    fn unknown_label_is_rejected() {
        let json = r#"["BOGUS", "x"]"#;
        let result: Result<ClientFrame, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn ok_message_round_trips() {
        let msg = RelayMessage::Ok {
            id: "a".repeat(64),
            accepted: true,
            message: String::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: RelayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn eose_message_round_trips() {
        let msg = RelayMessage::Eose {
            sub_id: "sub1".to_owned(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: RelayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
