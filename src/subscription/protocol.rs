use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server control frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ControlFrame {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
    /// First application frame on a fresh transport. The upgrade request
    /// cannot carry an Authorization header, so the bearer token travels here.
    #[serde(rename = "authenticate")]
    Authenticate { token: String },
}

impl ControlFrame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        ControlFrame::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        ControlFrame::Unsubscribe {
            topic: topic.into(),
        }
    }

    pub fn authenticate(token: impl Into<String>) -> Self {
        ControlFrame::Authenticate {
            token: token.into(),
        }
    }

    /// Serialize to the JSON text sent over the transport
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server → Client: data published on a topic
///
/// `message` is opaque to the client and handed to subscribers verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub topic: String,
    pub message: Value,
}
