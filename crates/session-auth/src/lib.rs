//! Session custody for the BFF gateway
//!
//! Holds the upstream access/refresh token pair on the server, keyed by an
//! opaque browser session id, and performs the raw upstream login and refresh
//! calls. The gateway crate builds single-flight refresh and retry on top.
//!
//! Credential flow:
//! 1. Login route calls `token::login()` with the user's email and password
//! 2. `Credential::issue()` turns the response into absolute expiry times
//! 3. The credential is stored via `CredentialStore::write()` under a new `SessionId`
//! 4. After an upstream 401 the gateway calls `token::refresh_token()`
//! 5. `Credential::rotated()` applies the refresh and is written back
//! 6. `spawn_sweeper()` purges sessions whose tokens have all expired

pub mod constants;
pub mod credentials;
pub mod error;
pub mod store;
pub mod sweep;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, SessionId, now_millis};
pub use error::{Error, Result};
pub use store::{CredentialStore, FileStore, MemoryStore, SessionStore, StoreFuture};
pub use sweep::spawn_sweeper;
pub use token::{TokenResponse, endpoint_url, login, refresh_token};
