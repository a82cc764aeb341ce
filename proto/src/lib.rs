//! Types shared by the parley server and its clients: the message model,
//! the topic naming scheme and the realtime websocket frames.

pub mod frames;
pub mod model;
pub mod topics;

pub use frames::{ClientFrame, ServerFrame};
pub use model::{
    Channel, ChannelKind, Conversation, Event, Member, MemberProfile, Message, MessagePage,
    Profile, Role, Scope, Server, DELETED_CONTENT, GENERAL_CHANNEL, MESSAGES_BATCH,
};
