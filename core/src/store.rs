//! Collaborator contracts consumed by the mutation handlers.

use anyhow::Result;
use parley_proto::{Member, Message, Profile, Role, Scope};
use uuid::Uuid;

/// A channel or conversation as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub scope: Scope,
    pub id: Uuid,
    /// Server whose roles govern moderation inside the container.
    pub server_id: Uuid,
    /// The caller's membership.
    pub caller: Member,
}

/// Change applied to a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePatch {
    /// Replace the content only.
    Content(String),
    /// Replace content with the sentinel, clear the file and flag it deleted.
    SoftDelete,
}

/// Caller information extracted by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Verified subject of the request's credentials, if any.
    pub subject: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
        }
    }
}

/// Persistence of messages and containers. Every call is atomic at the
/// single-record level.
pub trait MessageStore: Send + Sync {
    /// Container scoped to both its id and the caller's membership.
    fn find_container_for_member(
        &self,
        scope: Scope,
        container_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<Container>>;

    fn find_message(
        &self,
        scope: Scope,
        message_id: Uuid,
        container_id: Uuid,
    ) -> Result<Option<Message>>;

    fn create_message(
        &self,
        scope: Scope,
        container_id: Uuid,
        member_id: Uuid,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<Message>;

    fn update_message(&self, scope: Scope, message_id: Uuid, patch: &MessagePatch)
        -> Result<Message>;

    /// Messages older than `cursor` (or the newest), newest first.
    fn list_messages(
        &self,
        scope: Scope,
        container_id: Uuid,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Message>>;
}

/// Resolution of callers and their server roles.
pub trait Identity: Send + Sync {
    fn resolve_caller(&self, ctx: &RequestContext) -> Result<Option<Profile>>;

    fn resolve_member_role(&self, server_id: Uuid, profile_id: Uuid) -> Result<Option<Role>>;
}
