//! Session persistence for the dashboard API client
//!
//! Holds the authenticated session (token pair, user snapshot, flags) in a
//! process-wide observable store and mirrors it into exactly one of two
//! key-value backends:
//!
//! - durable (`FileBackend`): survives restarts, chosen when the user asked
//!   to be remembered at login
//! - ephemeral (`MemoryBackend`): lives only as long as the process
//!
//! Session flow:
//! 1. `SessionStore::restore()` recovers any persisted session at startup
//! 2. `SessionStore::login()` replaces the session and persists it
//! 3. `SessionStore::rotate_tokens()` swaps the token pair after a refresh,
//!    unless the session changed while the refresh was in flight
//! 4. `SessionStore::logout()` clears memory and both backends

pub mod backend;
pub mod error;
pub mod policy;
pub mod session;
pub mod store;

pub use backend::{Durability, FileBackend, KeyValueBackend, MemoryBackend};
pub use error::{Error, Result};
pub use policy::{Placement, StoragePolicy};
pub use session::{LoginGrant, PersistedSession, Session, TokenPair, UserIdentity};
pub use store::{DEFAULT_SESSION_KEY, SessionStore};
