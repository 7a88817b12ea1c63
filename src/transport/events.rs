use crate::session::{CommandStatus, OutputKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const COMMAND_STATUS_EVENT: &str = "command_status";
pub const COMMAND_OUTPUT_EVENT: &str = "command_output";

/// Payload of a `command_status` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub command_id: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub returncode: Option<i32>,
    #[serde(default)]
    pub is_server: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of a `command_output` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub command_id: String,
    pub output: String,
    #[serde(rename = "type", default)]
    pub kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(StatusEvent),
    Output(OutputEvent),
    Connected,
    ConnectError(String),
    Disconnected(String),
    Reconnected { attempts: u32 },
}

/// What a single text frame from the event channel means.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO open packet; the client must answer with a namespace connect.
    Open,
    Ping,
    Pong,
    NamespaceConnected,
    NamespaceDisconnected,
    Event(TransportEvent),
    Ignored,
}

fn decode_named_event(name: &str, data: Value) -> Frame {
    let decoded = match name {
        COMMAND_STATUS_EVENT => serde_json::from_value::<StatusEvent>(data).map(TransportEvent::Status),
        COMMAND_OUTPUT_EVENT => serde_json::from_value::<OutputEvent>(data).map(TransportEvent::Output),
        other => {
            debug!(event = %other, "Ignoring unrelated event");
            return Frame::Ignored;
        }
    };
    match decoded {
        Ok(event) => Frame::Event(event),
        Err(e) => {
            debug!(event = %name, error = %e, "Dropping malformed event payload");
            Frame::Ignored
        }
    }
}

fn decode_socketio_event(payload: &str) -> Frame {
    // `42["name", {...}]`, optionally with a namespace (`42/ns,[...]`) or an ack id.
    let array_start = match payload.find('[') {
        Some(idx) => idx,
        None => return Frame::Ignored,
    };
    let parts: Vec<Value> = match serde_json::from_str(&payload[array_start..]) {
        Ok(parts) => parts,
        Err(e) => {
            debug!(error = %e, "Malformed Socket.IO event frame");
            return Frame::Ignored;
        }
    };
    let mut parts = parts.into_iter();
    match (parts.next(), parts.next()) {
        (Some(Value::String(name)), Some(data)) => decode_named_event(&name, data),
        _ => Frame::Ignored,
    }
}

/// Decodes a text frame: Socket.IO v4 packets or a plain `{"event", "data"}` envelope.
pub fn decode_frame(text: &str) -> Frame {
    let text = text.trim();
    if text.starts_with('{') {
        #[derive(Deserialize)]
        struct Envelope {
            event: String,
            #[serde(default)]
            data: Value,
        }
        return match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => decode_named_event(&envelope.event, envelope.data),
            Err(e) => {
                debug!(error = %e, "Unrecognised JSON frame");
                Frame::Ignored
            }
        };
    }

    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Frame::Open,
        Some('2') => Frame::Ping,
        Some('3') => Frame::Pong,
        Some('4') => match chars.next() {
            Some('0') => Frame::NamespaceConnected,
            Some('1') => Frame::NamespaceDisconnected,
            Some('2') => decode_socketio_event(&text[2..]),
            Some('4') => Frame::Event(TransportEvent::ConnectError(text[2..].to_string())),
            _ => Frame::Ignored,
        },
        _ => Frame::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_socketio_status_event() {
        let frame = decode_frame(
            r#"42["command_status",{"command_id":"c1","status":"completed","returncode":2}]"#,
        );
        match frame {
            Frame::Event(TransportEvent::Status(event)) => {
                assert_eq!(event.command_id, "c1");
                assert_eq!(event.status, CommandStatus::Completed);
                assert_eq!(event.returncode, Some(2));
                assert_eq!(event.is_server, None);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn decodes_plain_envelope_output_event() {
        let frame = decode_frame(
            r#"{"event":"command_output","data":{"command_id":"c1","output":"hello","type":"stdout"}}"#,
        );
        assert_eq!(
            frame,
            Frame::Event(TransportEvent::Output(OutputEvent {
                command_id: "c1".into(),
                output: "hello".into(),
                kind: OutputKind::Stdout,
            }))
        );
    }

    #[test]
    fn engine_io_control_packets() {
        assert_eq!(decode_frame(r#"0{"sid":"abc","pingInterval":25000}"#), Frame::Open);
        assert_eq!(decode_frame("2"), Frame::Ping);
        assert_eq!(decode_frame(r#"40{"sid":"xyz"}"#), Frame::NamespaceConnected);
        assert_eq!(decode_frame("41"), Frame::NamespaceDisconnected);
    }

    #[test]
    fn unrelated_or_malformed_events_are_ignored() {
        assert_eq!(decode_frame(r#"42["analysis_done",{"x":1}]"#), Frame::Ignored);
        assert_eq!(decode_frame(r#"42["command_output",{"output":"no id"}]"#), Frame::Ignored);
        assert_eq!(decode_frame("42not json"), Frame::Ignored);
    }
}
