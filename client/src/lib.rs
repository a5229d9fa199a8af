//! Feed synchronization core for relatos: a canonical, filterable list of
//! posts kept in step with a remote collection gateway, with optimistic
//! comments and deletes and persisted filter selection.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
mod lock;
pub mod memory;
pub mod model;
pub mod persistence;
pub mod store;

pub use config::FeedConfig;
pub use error::{FeedError, FeedResult, GatewayError, StorageError};
pub use gateway::{ChangeStream, Gateway, GatewayResult};
pub use http::HttpGateway;
pub use memory::{MemoryBackend, MemoryGateway};
pub use model::{Comment, CommentId, FeedPost};
pub use persistence::{FileStore, FilterPersistence, KeyValueStore, MemoryStore};
pub use store::{FeedStore, LikeToggle};
