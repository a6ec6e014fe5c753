//! Authenticated upstream access for the BFF gateway
//!
//! Attaches the session's bearer token to upstream calls, recovers from a 401
//! with one coordinated refresh, and normalizes responses into typed results.
//!
//! Request lifecycle:
//! 1. `AuthenticatedClient::request()` reads the session credential and sends
//! 2. Upstream 401 → `RefreshCoordinator::refresh()` (one refresh per session,
//!    concurrent callers join it)
//! 3. New token → the request is replayed exactly once
//! 4. Refresh failure → the session is cleared and the 401 is returned as-is
//! 5. `translate()` turns the final response into `Ok(body)` or a typed `Error`

pub mod api;
pub mod client;
pub mod error;
pub mod refresh;
pub mod translate;

#[cfg(test)]
mod testing;

pub use api::{RequestOptions, ServerApi};
pub use client::{ApiRequest, Attempt, AuthenticatedClient, UpstreamResponse};
pub use error::{Error, Result};
pub use refresh::RefreshCoordinator;
pub use translate::{Envelope, translate};
