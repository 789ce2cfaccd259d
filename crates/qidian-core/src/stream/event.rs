use serde::Deserialize;

/// One typed event recovered from a response line.
///
/// `Error` is carried as data; deciding what a server-side error means for
/// the conversation is up to the session that consumes the events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Serialized shape shared by both framings: `{type, data?, message?}`.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Delta {
        data: String,
    },
    Done,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<WireEvent> for StreamEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Delta { data } => StreamEvent::Delta(data),
            WireEvent::Done => StreamEvent::Done,
            WireEvent::Error { message } => {
                StreamEvent::Error(message.unwrap_or_else(|| "unknown server error".to_string()))
            }
        }
    }
}

impl StreamEvent {
    /// Parse one JSON payload. Unknown `type` values and missing required
    /// fields are rejected the same way as invalid JSON.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<WireEvent>(payload).map(Into::into)
    }
}
