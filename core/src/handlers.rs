use std::sync::Arc;

use parley_proto::{
    topics::{self, TopicRef},
    Message, MessagePage, Profile, Role, Scope, MESSAGES_BATCH,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    bus::Publisher,
    error::{ChatError, ChatResult},
    store::{Container, Identity, MessagePatch, MessageStore, RequestContext},
};

/// Create request as received from the transport.
#[derive(Debug, Clone, Default)]
pub struct CreateMessage {
    pub container_id: Option<String>,
    pub content: Option<String>,
    pub file_url: Option<String>,
}

/// Edit request; only the content can change.
#[derive(Debug, Clone, Default)]
pub struct EditMessage {
    pub message_id: Option<String>,
    pub container_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteMessage {
    pub message_id: Option<String>,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchPage {
    pub container_id: Option<String>,
    pub cursor: Option<String>,
}

/// Mutation handlers for channel messages and direct messages.
///
/// Every mutation resolves the caller, validates identifiers, loads the
/// container through the caller's membership, authorizes, persists and only
/// then publishes exactly one event.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    identity: Arc<dyn Identity>,
    publisher: Arc<dyn Publisher>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn Identity>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            identity,
            publisher,
        }
    }

    pub fn create(
        &self,
        ctx: &RequestContext,
        scope: Scope,
        req: CreateMessage,
    ) -> ChatResult<Message> {
        let profile = self.caller(ctx)?;
        let container_id = required(req.container_id.as_deref(), scope.missing_id())?;
        let content = required(req.content.as_deref(), "Content missing")?;
        let container = self.container(scope, container_id, &profile)?;
        let file_url = req.file_url.as_deref().filter(|u| !u.trim().is_empty());
        let message = self.store.create_message(
            scope,
            container.id,
            container.caller.id,
            content,
            file_url,
        )?;
        self.announce(&topics::create_topic(&container.id), &message);
        Ok(message)
    }

    pub fn edit(&self, ctx: &RequestContext, scope: Scope, req: EditMessage) -> ChatResult<Message> {
        let profile = self.caller(ctx)?;
        let message_id = required(req.message_id.as_deref(), "Message id missing")?;
        let container_id = required(req.container_id.as_deref(), scope.missing_id())?;
        let content = required(req.content.as_deref(), "Content missing")?;
        let container = self.container(scope, container_id, &profile)?;
        let message = self.live_message(scope, message_id, &container)?;
        // moderators may delete but never rewrite someone else's words
        if message.member_id != container.caller.id {
            return Err(ChatError::Forbidden);
        }
        let updated = self.store.update_message(
            scope,
            message.id,
            &MessagePatch::Content(content.to_string()),
        )?;
        self.announce(&topics::update_topic(&container.id), &updated);
        Ok(updated)
    }

    pub fn delete(
        &self,
        ctx: &RequestContext,
        scope: Scope,
        req: DeleteMessage,
    ) -> ChatResult<Message> {
        let profile = self.caller(ctx)?;
        let message_id = required(req.message_id.as_deref(), "Message id missing")?;
        let container_id = required(req.container_id.as_deref(), scope.missing_id())?;
        let container = self.container(scope, container_id, &profile)?;
        let message = self.live_message(scope, message_id, &container)?;
        let is_owner = message.member_id == container.caller.id;
        if !is_owner {
            let role = self
                .identity
                .resolve_member_role(container.server_id, profile.id)?
                .unwrap_or(Role::Guest);
            if !role.can_moderate() {
                return Err(ChatError::Forbidden);
            }
        }
        let deleted = self
            .store
            .update_message(scope, message.id, &MessagePatch::SoftDelete)?;
        self.announce(&topics::update_topic(&container.id), &deleted);
        Ok(deleted)
    }

    /// One page of history, newest first, older than the cursor when given.
    pub fn fetch_page(
        &self,
        ctx: &RequestContext,
        scope: Scope,
        req: FetchPage,
    ) -> ChatResult<MessagePage> {
        let profile = self.caller(ctx)?;
        let container_id = required(req.container_id.as_deref(), scope.missing_id())?;
        let cursor = match req.cursor.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                Uuid::parse_str(raw).map_err(|_| ChatError::BadRequest("Invalid cursor".into()))?,
            ),
        };
        let container = self.container(scope, container_id, &profile)?;
        let items = self
            .store
            .list_messages(scope, container.id, cursor, MESSAGES_BATCH)?;
        Ok(MessagePage::from_items(items, MESSAGES_BATCH))
    }

    /// Check that the caller may listen on a topic: it must name a channel
    /// or conversation the caller participates in.
    pub fn authorize_topic(&self, ctx: &RequestContext, topic: &str) -> ChatResult<TopicRef> {
        let profile = self.caller(ctx)?;
        let parsed =
            topics::parse(topic).ok_or_else(|| ChatError::BadRequest("Invalid topic".into()))?;
        for scope in [Scope::Channel, Scope::Conversation] {
            if self
                .store
                .find_container_for_member(scope, parsed.container_id, profile.id)?
                .is_some()
            {
                return Ok(parsed);
            }
        }
        Err(ChatError::NotFound("Topic not found".into()))
    }

    fn caller(&self, ctx: &RequestContext) -> ChatResult<Profile> {
        self.identity
            .resolve_caller(ctx)?
            .ok_or(ChatError::Unauthenticated)
    }

    fn container(&self, scope: Scope, raw_id: &str, profile: &Profile) -> ChatResult<Container> {
        let not_found = || ChatError::NotFound(scope.not_found().into());
        let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
        self.store
            .find_container_for_member(scope, id, profile.id)?
            .ok_or_else(not_found)
    }

    /// Load a message that still accepts mutations.
    fn live_message(&self, scope: Scope, raw_id: &str, container: &Container) -> ChatResult<Message> {
        let not_found = || ChatError::NotFound("Message not found".into());
        let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
        match self.store.find_message(scope, id, container.id)? {
            Some(message) if !message.deleted => Ok(message),
            _ => Err(not_found()),
        }
    }

    fn announce(&self, topic: &str, message: &Message) {
        match self.publisher.emit(topic, message) {
            Ok(()) => debug!(topic, message_id = %message.id, "event published"),
            // already committed; subscribers catch up on their next fetch
            Err(e) => warn!(topic, message_id = %message.id, error = %e, "publish failed"),
        }
    }
}

fn required<'a>(value: Option<&'a str>, missing: &str) -> ChatResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ChatError::BadRequest(missing.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use parley_proto::{Member, MemberProfile, DELETED_CONTENT};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        // (scope, container) -> (server, participants)
        containers: Mutex<HashMap<(Scope, Uuid), (Uuid, Vec<Member>)>>,
        messages: Mutex<Vec<(Scope, Message)>>,
        profiles: Mutex<HashMap<Uuid, Profile>>,
        clock: Mutex<i64>,
        fail_writes: Mutex<bool>,
    }

    impl MessageStore for MemoryStore {
        fn find_container_for_member(
            &self,
            scope: Scope,
            container_id: Uuid,
            profile_id: Uuid,
        ) -> anyhow::Result<Option<Container>> {
            let guard = self.containers.lock();
            Ok(guard.get(&(scope, container_id)).and_then(|(server, members)| {
                members
                    .iter()
                    .find(|m| m.profile_id == profile_id)
                    .map(|m| Container {
                        scope,
                        id: container_id,
                        server_id: *server,
                        caller: m.clone(),
                    })
            }))
        }

        fn find_message(
            &self,
            scope: Scope,
            message_id: Uuid,
            container_id: Uuid,
        ) -> anyhow::Result<Option<Message>> {
            Ok(self
                .messages
                .lock()
                .iter()
                .find(|(s, m)| *s == scope && m.id == message_id && m.container_id == container_id)
                .map(|(_, m)| m.clone()))
        }

        fn create_message(
            &self,
            scope: Scope,
            container_id: Uuid,
            member_id: Uuid,
            content: &str,
            file_url: Option<&str>,
        ) -> anyhow::Result<Message> {
            if *self.fail_writes.lock() {
                anyhow::bail!("disk full");
            }
            let (role, profile_id) = self
                .containers
                .lock()
                .values()
                .flat_map(|(_, members)| members.iter())
                .find(|m| m.id == member_id)
                .map(|m| (m.role, m.profile_id))
                .unwrap();
            let profile = self.profiles.lock()[&profile_id].clone();
            let now = {
                let mut clock = self.clock.lock();
                *clock += 1;
                *clock
            };
            let message = Message {
                id: Uuid::new_v4(),
                content: content.into(),
                file_url: file_url.map(Into::into),
                deleted: false,
                member_id,
                container_id,
                created_at: now,
                updated_at: now,
                member: MemberProfile {
                    id: member_id,
                    role,
                    profile,
                },
            };
            self.messages.lock().push((scope, message.clone()));
            Ok(message)
        }

        fn update_message(
            &self,
            _scope: Scope,
            message_id: Uuid,
            patch: &MessagePatch,
        ) -> anyhow::Result<Message> {
            let mut guard = self.messages.lock();
            let (_, message) = guard
                .iter_mut()
                .find(|(_, m)| m.id == message_id)
                .ok_or_else(|| anyhow::anyhow!("missing"))?;
            match patch {
                MessagePatch::Content(content) => message.content = content.clone(),
                MessagePatch::SoftDelete => {
                    message.content = DELETED_CONTENT.into();
                    message.file_url = None;
                    message.deleted = true;
                }
            }
            message.updated_at += 1;
            Ok(message.clone())
        }

        fn list_messages(
            &self,
            scope: Scope,
            container_id: Uuid,
            cursor: Option<Uuid>,
            limit: usize,
        ) -> anyhow::Result<Vec<Message>> {
            let guard = self.messages.lock();
            let mut all: Vec<Message> = guard
                .iter()
                .filter(|(s, m)| *s == scope && m.container_id == container_id)
                .map(|(_, m)| m.clone())
                .collect();
            all.sort_by_key(|m| std::cmp::Reverse(m.order_key()));
            let start = match cursor {
                Some(c) => all.iter().position(|m| m.id == c).map_or(all.len(), |p| p + 1),
                None => 0,
            };
            Ok(all.into_iter().skip(start).take(limit).collect())
        }
    }

    impl Identity for MemoryStore {
        fn resolve_caller(&self, ctx: &RequestContext) -> anyhow::Result<Option<Profile>> {
            let Some(sub) = ctx.subject.as_deref() else {
                return Ok(None);
            };
            let Ok(id) = Uuid::parse_str(sub) else {
                return Ok(None);
            };
            Ok(self.profiles.lock().get(&id).cloned())
        }

        fn resolve_member_role(
            &self,
            server_id: Uuid,
            profile_id: Uuid,
        ) -> anyhow::Result<Option<Role>> {
            Ok(self
                .containers
                .lock()
                .values()
                .flat_map(|(_, members)| members.iter())
                .find(|m| m.server_id == server_id && m.profile_id == profile_id)
                .map(|m| m.role))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<(String, Message)>>,
        fail: bool,
    }

    impl Publisher for RecordingPublisher {
        fn emit(&self, topic: &str, payload: &Message) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("bus unreachable");
            }
            self.events.lock().push((topic.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct Fixture {
        service: MessageService,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
        channel: Uuid,
        conversation: Uuid,
        outsider_channel: Uuid,
    }

    struct Caller {
        ctx: RequestContext,
    }

    impl Fixture {
        fn new() -> (Self, Caller, Caller, Caller, Caller) {
            Self::with_publisher(RecordingPublisher::default())
        }

        fn with_publisher(publisher: RecordingPublisher) -> (Self, Caller, Caller, Caller, Caller) {
            let store = Arc::new(MemoryStore::default());
            let publisher = Arc::new(publisher);
            let server = Uuid::new_v4();
            let mut members = Vec::new();
            let mut callers = Vec::new();
            for (name, role) in [
                ("alice", Role::Guest),
                ("bob", Role::Admin),
                ("carol", Role::Moderator),
                ("dave", Role::Guest),
            ] {
                let profile = Profile {
                    id: Uuid::new_v4(),
                    name: name.into(),
                    image_url: None,
                };
                members.push(Member {
                    id: Uuid::new_v4(),
                    role,
                    profile_id: profile.id,
                    server_id: server,
                });
                callers.push(Caller {
                    ctx: RequestContext::for_subject(profile.id.to_string()),
                });
                store.profiles.lock().insert(profile.id, profile);
            }
            let channel = Uuid::new_v4();
            let conversation = Uuid::new_v4();
            let outsider_channel = Uuid::new_v4();
            {
                let mut containers = store.containers.lock();
                containers.insert((Scope::Channel, channel), (server, members.clone()));
                // alice <-> bob
                containers.insert(
                    (Scope::Conversation, conversation),
                    (server, vec![members[0].clone(), members[1].clone()]),
                );
                containers.insert((Scope::Channel, outsider_channel), (Uuid::new_v4(), vec![]));
            }
            let service = MessageService::new(store.clone(), store.clone(), publisher.clone());
            let mut it = callers.into_iter();
            (
                Self {
                    service,
                    store,
                    publisher,
                    channel,
                    conversation,
                    outsider_channel,
                },
                it.next().unwrap(),
                it.next().unwrap(),
                it.next().unwrap(),
                it.next().unwrap(),
            )
        }

        fn create(&self, caller: &Caller, content: &str) -> ChatResult<Message> {
            self.service.create(
                &caller.ctx,
                Scope::Channel,
                CreateMessage {
                    container_id: Some(self.channel.to_string()),
                    content: Some(content.into()),
                    file_url: Some("https://files.example/cat.png".into()),
                },
            )
        }

        fn edit(&self, caller: &Caller, id: Uuid, content: &str) -> ChatResult<Message> {
            self.service.edit(
                &caller.ctx,
                Scope::Channel,
                EditMessage {
                    message_id: Some(id.to_string()),
                    container_id: Some(self.channel.to_string()),
                    content: Some(content.into()),
                },
            )
        }

        fn delete(&self, caller: &Caller, id: Uuid) -> ChatResult<Message> {
            self.service.delete(
                &caller.ctx,
                Scope::Channel,
                DeleteMessage {
                    message_id: Some(id.to_string()),
                    container_id: Some(self.channel.to_string()),
                },
            )
        }

        fn events(&self) -> Vec<(String, Message)> {
            self.publisher.events.lock().clone()
        }
    }

    #[test]
    fn create_publishes_on_create_topic() {
        let (fx, alice, ..) = Fixture::new();
        let msg = fx.create(&alice, "hello").unwrap();
        assert!(!msg.deleted);
        assert_eq!(msg.container_id, fx.channel);
        assert_eq!(msg.member.profile.name, "alice");
        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, format!("chat:{}:messages", fx.channel));
        assert_eq!(events[0].1.content, "hello");
    }

    #[test]
    fn admin_deletes_foreign_message() {
        let (fx, alice, bob, ..) = Fixture::new();
        let msg = fx.create(&alice, "hello").unwrap();
        let deleted = fx.delete(&bob, msg.id).unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.content, DELETED_CONTENT);
        assert_eq!(deleted.file_url, None);
        let events = fx.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0, format!("chat:{}:messages:update", fx.channel));
        assert!(events[1].1.deleted);
    }

    #[test]
    fn admin_cannot_edit_foreign_message() {
        let (fx, alice, bob, ..) = Fixture::new();
        let msg = fx.create(&alice, "hello").unwrap();
        assert!(matches!(fx.edit(&bob, msg.id, "pwned"), Err(ChatError::Forbidden)));
        assert_eq!(fx.events().len(), 1);
        let stored = fx
            .store
            .find_message(Scope::Channel, msg.id, fx.channel)
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, "hello");
    }

    #[test]
    fn delete_permissions_by_role() {
        let (fx, alice, _bob, carol, dave) = Fixture::new();
        let a = fx.create(&alice, "one").unwrap();
        assert!(matches!(fx.delete(&dave, a.id), Err(ChatError::Forbidden)));
        assert!(fx.delete(&carol, a.id).unwrap().deleted);
        let b = fx.create(&dave, "two").unwrap();
        assert!(fx.delete(&dave, b.id).unwrap().deleted);
    }

    #[test]
    fn edit_by_owner_only_replaces_content() {
        let (fx, alice, _, carol, _) = Fixture::new();
        let msg = fx.create(&alice, "hello").unwrap();
        assert!(matches!(fx.edit(&carol, msg.id, "x"), Err(ChatError::Forbidden)));
        let edited = fx.edit(&alice, msg.id, "hello again").unwrap();
        assert_eq!(edited.content, "hello again");
        assert_eq!(edited.file_url.as_deref(), Some("https://files.example/cat.png"));
        assert!(!edited.deleted);
        let last = fx.events().pop().unwrap();
        assert_eq!(last.0, format!("chat:{}:messages:update", fx.channel));
        assert!(!last.1.deleted);
    }

    #[test]
    fn deleted_messages_are_immutable() {
        let (fx, alice, bob, ..) = Fixture::new();
        let msg = fx.create(&alice, "hello").unwrap();
        fx.delete(&alice, msg.id).unwrap();
        assert!(matches!(fx.delete(&bob, msg.id), Err(ChatError::NotFound(_))));
        assert!(matches!(fx.edit(&alice, msg.id, "x"), Err(ChatError::NotFound(_))));
        assert_eq!(fx.events().len(), 2);
    }

    #[test]
    fn unauthenticated_before_validation() {
        let (fx, ..) = Fixture::new();
        let err = fx
            .service
            .create(&RequestContext::anonymous(), Scope::Channel, CreateMessage::default())
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));
        let stranger = RequestContext::for_subject(Uuid::new_v4().to_string());
        let err = fx
            .service
            .create(&stranger, Scope::Channel, CreateMessage::default())
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));
    }

    #[test]
    fn missing_fields_are_bad_requests() {
        let (fx, alice, ..) = Fixture::new();
        let err = fx
            .service
            .create(
                &alice.ctx,
                Scope::Conversation,
                CreateMessage {
                    content: Some("hi".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Conversation id missing");
        let err = fx
            .service
            .create(
                &alice.ctx,
                Scope::Channel,
                CreateMessage {
                    container_id: Some(fx.channel.to_string()),
                    content: Some("   ".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Content missing");
        let err = fx
            .service
            .delete(
                &alice.ctx,
                Scope::Channel,
                DeleteMessage {
                    container_id: Some(fx.channel.to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "Message id missing");
        assert!(fx.events().is_empty());
    }

    #[test]
    fn non_members_see_not_found() {
        let (fx, alice, ..) = Fixture::new();
        let req = |id: String| CreateMessage {
            container_id: Some(id),
            content: Some("hi".into()),
            file_url: None,
        };
        let err = fx
            .service
            .create(&alice.ctx, Scope::Channel, req(fx.outsider_channel.to_string()))
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        let err = fx
            .service
            .create(&alice.ctx, Scope::Channel, req(Uuid::new_v4().to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Channel not found");
        let err = fx
            .service
            .create(&alice.ctx, Scope::Channel, req("not-an-id".into()))
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn conversation_uses_same_topics_keyed_by_conversation() {
        let (fx, alice, bob, carol, _) = Fixture::new();
        let msg = fx
            .service
            .create(
                &alice.ctx,
                Scope::Conversation,
                CreateMessage {
                    container_id: Some(fx.conversation.to_string()),
                    content: Some("psst".into()),
                    file_url: None,
                },
            )
            .unwrap();
        assert_eq!(fx.events()[0].0, format!("chat:{}:messages", fx.conversation));
        // carol moderates the server but is not part of the conversation
        let err = fx
            .service
            .delete(
                &carol.ctx,
                Scope::Conversation,
                DeleteMessage {
                    message_id: Some(msg.id.to_string()),
                    container_id: Some(fx.conversation.to_string()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        let deleted = fx
            .service
            .delete(
                &bob.ctx,
                Scope::Conversation,
                DeleteMessage {
                    message_id: Some(msg.id.to_string()),
                    container_id: Some(fx.conversation.to_string()),
                },
            )
            .unwrap();
        assert!(deleted.deleted);
        assert_eq!(fx.events()[1].0, format!("chat:{}:messages:update", fx.conversation));
    }

    #[test]
    fn message_lookup_is_scoped_to_container() {
        let (fx, alice, ..) = Fixture::new();
        let msg = fx.create(&alice, "hello").unwrap();
        let err = fx
            .service
            .delete(
                &alice.ctx,
                Scope::Conversation,
                DeleteMessage {
                    message_id: Some(msg.id.to_string()),
                    container_id: Some(fx.conversation.to_string()),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn publish_failure_does_not_fail_the_request() {
        let (fx, alice, ..) = Fixture::with_publisher(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let msg = fx.create(&alice, "hello").unwrap();
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn storage_failure_is_internal_and_silent() {
        let (fx, alice, ..) = Fixture::new();
        *fx.store.fail_writes.lock() = true;
        let err = fx.create(&alice, "hello").unwrap_err();
        assert!(err.is_internal());
        assert!(fx.events().is_empty());
    }

    #[test]
    fn pages_walk_backwards() {
        let (fx, alice, ..) = Fixture::new();
        for i in 0..13 {
            fx.create(&alice, &format!("m{i}")).unwrap();
        }
        let fetch = |cursor: Option<Uuid>| {
            fx.service
                .fetch_page(
                    &alice.ctx,
                    Scope::Channel,
                    FetchPage {
                        container_id: Some(fx.channel.to_string()),
                        cursor: cursor.map(|c| c.to_string()),
                    },
                )
                .unwrap()
        };
        let first = fetch(None);
        assert_eq!(first.items.len(), MESSAGES_BATCH);
        assert_eq!(first.items[0].content, "m12");
        let second = fetch(first.next_cursor);
        assert_eq!(second.items.len(), 3);
        assert_eq!(second.items[2].content, "m0");
        assert_eq!(second.next_cursor, None);
    }

    #[test]
    fn topic_authorization_requires_participation() {
        let (fx, alice, _, carol, _) = Fixture::new();
        let ok = fx
            .service
            .authorize_topic(&alice.ctx, &topics::update_topic(&fx.conversation))
            .unwrap();
        assert_eq!(ok.container_id, fx.conversation);
        assert!(matches!(
            fx.service
                .authorize_topic(&carol.ctx, &topics::create_topic(&fx.conversation)),
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.authorize_topic(&alice.ctx, "timer.tick"),
            Err(ChatError::BadRequest(_))
        ));
    }
}
