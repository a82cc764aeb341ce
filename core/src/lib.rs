//! Server-side core of parley: the topic event bus, the error taxonomy, the
//! collaborator contracts and the message mutation handlers.

pub mod bus;
pub mod error;
pub mod handlers;
pub mod store;

pub use bus::{EventBus, Publisher, Subscription, SubscriptionHandle};
pub use error::{ChatError, ChatResult};
pub use handlers::{CreateMessage, DeleteMessage, EditMessage, FetchPage, MessageService};
pub use store::{Container, Identity, MessagePatch, MessageStore, RequestContext};
