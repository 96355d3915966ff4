//! Wire format of the player's JSON IPC protocol.
//!
//! Every message is one JSON object terminated by `\n`. Outgoing commands carry
//! a `request_id`; incoming objects are either responses (echoing the id),
//! asynchronous events (an `event` field), or bare output.

use serde::Serialize;
use serde_json::Value;

use crate::error::IpcResult;

/// Outgoing command envelope.
#[derive(Debug, Serialize)]
struct CommandEnvelope<'a> {
    command: &'a Value,
    request_id: u64,
}

/// Serializes a command plus its request id as one newline-terminated line.
pub fn encode_command(command: &Value, request_id: u64) -> IpcResult<String> {
    let mut line = serde_json::to_string(&CommandEnvelope {
        command,
        request_id,
    })?;
    line.push('\n');
    Ok(line)
}

/// Events delivered by the transport.
///
/// Property changes and player events arrive on the observation socket; the
/// lifecycle variants (`Shutdown`, `Crashed`, `Stopped`) are synthesized by the
/// transport itself.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An observed property changed value.
    PropertyChange { name: String, data: Value },
    /// The current file finished loading or was unloaded.
    EndFile { reason: Option<String> },
    /// A file was loaded and playback is about to start.
    FileLoaded,
    /// A message sent by in-player scripting (`script-message`).
    ClientMessage { args: Vec<String> },
    /// The player reported its own shutdown.
    Shutdown,
    /// The observation socket closed without a prior shutdown.
    Crashed,
    /// `stop()` completed.
    Stopped,
    /// A payload with neither `event` nor `request_id`.
    Output(Value),
    /// Any other named player event.
    Other { event: String, payload: Value },
}

impl TransportEvent {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::PropertyChange { .. } => "property-change",
            Self::EndFile { .. } => "end-file",
            Self::FileLoaded => "file-loaded",
            Self::ClientMessage { .. } => "client-message",
            Self::Shutdown => "shutdown",
            Self::Crashed => "crashed",
            Self::Stopped => "stop",
            Self::Output(_) => "output",
            Self::Other { event, .. } => event,
        }
    }
}

/// A decoded incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Response to a command.
    Response {
        request_id: u64,
        error: String,
        data: Value,
    },
    /// Asynchronous notification.
    Event(TransportEvent),
}

impl IncomingMessage {
    /// Classifies one parsed JSON object.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if let Some(event) = value.get("event").and_then(Value::as_str) {
            return Self::Event(parse_event(event, &value));
        }

        if let Some(request_id) = value.get("request_id").and_then(Value::as_u64) {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("success")
                .to_string();
            let data = value.get("data").cloned().unwrap_or(Value::Null);
            return Self::Response {
                request_id,
                error,
                data,
            };
        }

        Self::Event(TransportEvent::Output(value))
    }
}

fn parse_event(event: &str, value: &Value) -> TransportEvent {
    match event {
        "property-change" => TransportEvent::PropertyChange {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            data: value.get("data").cloned().unwrap_or(Value::Null),
        },
        "end-file" => TransportEvent::EndFile {
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        "file-loaded" => TransportEvent::FileLoaded,
        "client-message" => TransportEvent::ClientMessage {
            args: value
                .get("args")
                .and_then(Value::as_array)
                .map(|args| {
                    args.iter()
                        .map(|a| match a {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        },
        "shutdown" => TransportEvent::Shutdown,
        other => TransportEvent::Other {
            event: other.to_string(),
            payload: value.clone(),
        },
    }
}

/// Incremental decoder for newline-delimited JSON.
///
/// A single read may contain several messages or end mid-message; the
/// remainder is kept until the next chunk completes it.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every complete message it finished.
    ///
    /// Blank lines and lines that are not valid JSON objects are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<IncomingMessage> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(trimmed) {
                Ok(value @ Value::Object(_)) => messages.push(IncomingMessage::from_value(value)),
                Ok(other) => log::debug!("[Transport] Ignoring non-object message: {}", other),
                Err(e) => log::debug!("[Transport] Invalid JSON line '{}': {}", trimmed, e),
            }
        }

        messages
    }

    /// Bytes waiting for a terminating newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_command_as_single_line() {
        let line = encode_command(&json!(["get_property", "volume"]), 7).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["request_id"], 7);
        assert_eq!(parsed["command"], json!(["get_property", "volume"]));
    }

    #[test]
    fn decodes_multiple_messages_from_one_chunk() {
        let mut decoder = MessageDecoder::new();
        let chunk = concat!(
            r#"{"event":"property-change","id":1,"name":"time-pos","data":1.5}"#,
            "\n",
            r#"{"request_id":3,"error":"success","data":null}"#,
            "\n",
            r#"{"event":"shutdown"}"#,
            "\n"
        );

        let messages = decoder.push(chunk.as_bytes());
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            IncomingMessage::Event(TransportEvent::PropertyChange {
                name: "time-pos".into(),
                data: json!(1.5),
            })
        );
        assert!(matches!(
            messages[1],
            IncomingMessage::Response { request_id: 3, .. }
        ));
        assert_eq!(messages[2], IncomingMessage::Event(TransportEvent::Shutdown));
    }

    #[test]
    fn keeps_partial_line_until_completed() {
        let mut decoder = MessageDecoder::new();
        assert!(decoder.push(br#"{"request_id":1,"err"#).is_empty());
        assert!(decoder.pending_len() > 0);

        let messages = decoder.push(b"or\":\"success\",\"data\":42}\n");
        assert_eq!(
            messages,
            vec![IncomingMessage::Response {
                request_id: 1,
                error: "success".into(),
                data: json!(42),
            }]
        );
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn skips_garbage_lines() {
        let mut decoder = MessageDecoder::new();
        let messages = decoder.push(b"not json\n\n[1,2]\n{\"event\":\"file-loaded\"}\n");
        assert_eq!(messages, vec![IncomingMessage::Event(TransportEvent::FileLoaded)]);
    }

    #[test]
    fn payload_without_event_or_id_is_output() {
        let message = IncomingMessage::from_value(json!({"hello": "world"}));
        assert_eq!(
            message,
            IncomingMessage::Event(TransportEvent::Output(json!({"hello": "world"})))
        );
    }

    #[test]
    fn client_message_args_are_stringified() {
        let message = IncomingMessage::from_value(json!({
            "event": "client-message",
            "args": ["seek", 12]
        }));
        assert_eq!(
            message,
            IncomingMessage::Event(TransportEvent::ClientMessage {
                args: vec!["seek".into(), "12".into()],
            })
        );
    }

    #[test]
    fn unknown_events_keep_their_payload() {
        let message = IncomingMessage::from_value(json!({"event": "seek"}));
        match message {
            IncomingMessage::Event(TransportEvent::Other { event, .. }) => assert_eq!(event, "seek"),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
