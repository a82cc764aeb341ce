//! Deterministic topic strings shared by publishers and subscribers.
//!
//! Creates and edits/deletes go to different topics so a subscriber can
//! treat "append" and "patch in place" as separate operations without
//! inspecting the payload.

use uuid::Uuid;

const PREFIX: &str = "chat";
const CREATE_SUFFIX: &str = "messages";
const UPDATE_SUFFIX: &str = "messages:update";

/// Which of the two per-container topics a string names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Create,
    Update,
}

/// A parsed topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicRef {
    pub container_id: Uuid,
    pub kind: TopicKind,
}

/// Topic carrying newly created messages of a channel or conversation.
pub fn create_topic(container_id: &Uuid) -> String {
    format!("{PREFIX}:{container_id}:{CREATE_SUFFIX}")
}

/// Topic carrying edits and soft-deletes of a channel or conversation.
pub fn update_topic(container_id: &Uuid) -> String {
    format!("{PREFIX}:{container_id}:{UPDATE_SUFFIX}")
}

/// Both topics of a container, create topic first.
pub fn container_topics(container_id: &Uuid) -> [String; 2] {
    [create_topic(container_id), update_topic(container_id)]
}

/// Parse a topic produced by [`create_topic`] or [`update_topic`].
pub fn parse(topic: &str) -> Option<TopicRef> {
    let rest = topic.strip_prefix(PREFIX)?.strip_prefix(':')?;
    let (id, suffix) = rest.split_once(':')?;
    let kind = match suffix {
        CREATE_SUFFIX => TopicKind::Create,
        UPDATE_SUFFIX => TopicKind::Update,
        _ => return None,
    };
    let container_id = Uuid::parse_str(id).ok()?;
    Some(TopicRef { container_id, kind })
}
