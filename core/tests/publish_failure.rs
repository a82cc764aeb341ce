use std::{
    io,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use parley_core::{
    Container, CreateMessage, Identity, MessagePatch, MessageService, MessageStore, Publisher,
    RequestContext,
};
use parley_proto::{Member, MemberProfile, Message, Profile, Role, Scope};
use uuid::Uuid;

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

/// A broker that is never reachable.
struct DownBroker;
impl Publisher for DownBroker {
    fn emit(&self, _topic: &str, _payload: &Message) -> Result<()> {
        Err(anyhow!("broker unreachable"))
    }
}

/// One channel with one member; stores whatever is created.
struct OneRoom {
    profile: Profile,
    member: Member,
    channel: Uuid,
    saved: Mutex<Vec<Message>>,
}

impl OneRoom {
    fn new() -> Self {
        let profile = Profile {
            id: Uuid::new_v4(),
            name: "Alice".into(),
            image_url: None,
        };
        let member = Member {
            id: Uuid::new_v4(),
            role: Role::Guest,
            profile_id: profile.id,
            server_id: Uuid::new_v4(),
        };
        Self {
            profile,
            member,
            channel: Uuid::new_v4(),
            saved: Mutex::new(Vec::new()),
        }
    }
}

impl MessageStore for OneRoom {
    fn find_container_for_member(
        &self,
        scope: Scope,
        container_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<Container>> {
        let found = scope == Scope::Channel
            && container_id == self.channel
            && profile_id == self.profile.id;
        Ok(found.then(|| Container {
            scope,
            id: self.channel,
            server_id: self.member.server_id,
            caller: self.member.clone(),
        }))
    }

    fn find_message(&self, _: Scope, message_id: Uuid, _: Uuid) -> Result<Option<Message>> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    fn create_message(
        &self,
        _scope: Scope,
        container_id: Uuid,
        member_id: Uuid,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            content: content.into(),
            file_url: file_url.map(Into::into),
            deleted: false,
            member_id,
            container_id,
            created_at: 1,
            updated_at: 1,
            member: MemberProfile {
                id: member_id,
                role: self.member.role,
                profile: self.profile.clone(),
            },
        };
        self.saved.lock().unwrap().push(message.clone());
        Ok(message)
    }

    fn update_message(&self, _: Scope, _: Uuid, _: &MessagePatch) -> Result<Message> {
        Err(anyhow!("not used here"))
    }

    fn list_messages(&self, _: Scope, _: Uuid, _: Option<Uuid>, _: usize) -> Result<Vec<Message>> {
        Ok(self.saved.lock().unwrap().clone())
    }
}

impl Identity for OneRoom {
    fn resolve_caller(&self, ctx: &RequestContext) -> Result<Option<Profile>> {
        let known = ctx.subject.as_deref() == Some(self.profile.id.to_string().as_str());
        Ok(known.then(|| self.profile.clone()))
    }

    fn resolve_member_role(&self, _: Uuid, _: Uuid) -> Result<Option<Role>> {
        Ok(Some(self.member.role))
    }
}

#[test]
fn committed_create_survives_a_failed_publish() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(MakeLogWriter(buf.clone()))
        .with_ansi(false)
        .finish();
    let room = Arc::new(OneRoom::new());
    let service = MessageService::new(room.clone(), room.clone(), Arc::new(DownBroker));
    let ctx = RequestContext::for_subject(room.profile.id.to_string());

    let created = tracing::subscriber::with_default(subscriber, || {
        service.create(
            &ctx,
            Scope::Channel,
            CreateMessage {
                container_id: Some(room.channel.to_string()),
                content: Some("still here".into()),
                file_url: None,
            },
        )
    })
    .unwrap();

    assert_eq!(created.content, "still here");
    assert!(!created.deleted);
    assert_eq!(room.saved.lock().unwrap().len(), 1);
    let logs = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("publish failed"), "logs: {logs}");
    assert!(logs.contains("broker unreachable"), "logs: {logs}");
}
