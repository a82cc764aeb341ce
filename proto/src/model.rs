use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content stored in place of the original text once a message is soft-deleted.
pub const DELETED_CONTENT: &str = "This message has been deleted";

/// Number of messages returned per page.
pub const MESSAGES_BATCH: usize = 10;

/// Role of a member inside one server.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Guest,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "GUEST",
            Role::Moderator => "MODERATOR",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GUEST" => Some(Role::Guest),
            "MODERATOR" => Some(Role::Moderator),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Whether the role may soft-delete messages written by other members.
    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::Admin | Role::Moderator)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
}

/// A profile's participation in one server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub role: Role,
    pub profile_id: Uuid,
    pub server_id: Uuid,
}

/// Author information embedded in every message payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemberProfile {
    pub id: Uuid,
    pub role: Role,
    pub profile: Profile,
}

/// Media of a channel. Only text channels carry messages today; the kind is
/// kept so clients can render the channel list.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    #[default]
    Text,
    Audio,
    Video,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "TEXT",
            ChannelKind::Audio => "AUDIO",
            ChannelKind::Video => "VIDEO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(ChannelKind::Text),
            "AUDIO" => Some(ChannelKind::Audio),
            "VIDEO" => Some(ChannelKind::Video),
            _ => None,
        }
    }
}

/// Name of the channel every server is created with. It cannot be renamed,
/// deleted or reused.
pub const GENERAL_CHANNEL: &str = "general";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    pub server_id: Uuid,
}

/// A server with its members and channels, as returned by the management
/// routes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    /// Code a profile presents to join the server.
    pub invite_code: String,
    /// Owner profile.
    pub profile_id: Uuid,
    pub members: Vec<MemberProfile>,
    pub channels: Vec<Channel>,
}

impl Server {
    pub fn member_for(&self, profile_id: Uuid) -> Option<&MemberProfile> {
        self.members.iter().find(|m| m.profile.id == profile_id)
    }

    pub fn channel_named(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// Direct-message container between two members of one server.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub member_one_id: Uuid,
    pub member_two_id: Uuid,
}

/// The two kinds of container a message can belong to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// A channel inside a server.
    Channel,
    /// A direct-message conversation between two members.
    Conversation,
}

impl Scope {
    /// Message shown when the container id is absent from a request.
    pub fn missing_id(&self) -> &'static str {
        match self {
            Scope::Channel => "Channel id missing",
            Scope::Conversation => "Conversation id missing",
        }
    }

    pub fn not_found(&self) -> &'static str {
        match self {
            Scope::Channel => "Channel not found",
            Scope::Conversation => "Conversation not found",
        }
    }
}

/// A channel message or direct message.
///
/// Edits and soft-deletes travel as the same type; `deleted` is the only
/// thing telling them apart.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub file_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub member_id: Uuid,
    pub container_id: Uuid,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
    pub member: MemberProfile,
}

impl Message {
    /// Ordering key shared by server queries and client caches.
    pub fn order_key(&self) -> (i64, Uuid) {
        (self.created_at, self.id)
    }

    /// True once the message was edited after creation and is not deleted.
    pub fn is_edited(&self) -> bool {
        !self.deleted && self.updated_at != self.created_at
    }
}

/// A page of messages, newest first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct MessagePage {
    pub items: Vec<Message>,
    /// Cursor for the next older page; `None` when this page is the last.
    pub next_cursor: Option<Uuid>,
}

impl MessagePage {
    /// Build a page from a query result, deriving the cursor from its size.
    pub fn from_items(items: Vec<Message>, batch: usize) -> Self {
        let next_cursor = if items.len() == batch {
            items.last().map(|m| m.id)
        } else {
            None
        };
        Self { items, next_cursor }
    }
}

/// Ephemeral envelope delivered to topic subscribers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Event {
    pub topic: String,
    pub payload: Message,
}
