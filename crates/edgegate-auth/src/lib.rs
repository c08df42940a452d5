//! Device identity and authorization for edgegate.
//!
//! 1. **Identification**: a device secret is resolved to a [`ClientId`]
//!    through the [`AuthCache`], which fronts an [`IdentityStore`] with a
//!    TTL cache ([`KeyValueCache`]).
//! 2. **Authorization**: every publish/subscribe/unsubscribe is checked
//!    against an [`Authorizer`] for the exact `(client, channel, action)`
//!    triple.
//!
//! ```text
//! Session Handler (above)  ← calls Authenticator / Authorizer per hook
//!     ↕
//! Auth Layer (this crate)  ← cache + narrow capabilities
//!     ↕
//! Protocol Layer (below)   ← ClientId, ChannelId
//! ```
//!
//! [`ClientId`]: edgegate_protocol::ClientId

mod auth;
mod cache;
mod error;
mod stores;

pub use auth::{Action, Authenticator, Authorizer, IdentityStore};
pub use cache::{AuthCache, AuthCacheConfig, KeyValueCache, MemoryCache};
pub use error::{AuthError, CacheError};
pub use stores::{Rule, StaticIdentityStore, StaticPolicy, WILDCARD};
