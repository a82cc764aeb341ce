use serde::{Deserialize, Serialize};

use crate::model::Message;

/// Frames sent by a client over the realtime websocket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

/// Frames sent by the server over the realtime websocket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello,
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    Event {
        topic: String,
        payload: Message,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        error: String,
    },
}
