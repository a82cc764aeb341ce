//! Client side of parley: the shared socket, the connection signal, the paged
//! message cache and the per-view feed that keeps it fresh.

pub mod cache;
pub mod connection;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod socket;

pub use cache::{MessageCache, Page};
pub use connection::{ConnectionManager, Link};
pub use error::{ClientError, ClientResult};
pub use feed::{ChatFeed, FeedConfig, FeedState};
pub use fetch::{HttpClient, PageSource};
pub use socket::{JoinGuard, Socket, SocketConfig};
