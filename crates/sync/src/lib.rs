pub mod admin;
pub mod config;
pub mod error;
pub mod feed;
pub mod messaging;
pub mod models;
pub mod optimistic;
pub mod session;
pub mod store;
pub mod subscription;
pub mod viewport;

pub use config::Config;
pub use error::{ErrorKind, Result, SyncError};
pub use session::{sign_in, AuthIdentity, ProfileCache, Session};
pub use store::{DocumentStore, MemoryStore};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
