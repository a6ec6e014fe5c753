//! Upstream endpoint paths and session lifetimes
//!
//! Paths are appended to the configured API base URL. Lifetimes mirror the
//! credential contract: the access token lives for whatever `expires_in` the
//! upstream reports, the refresh token for a fixed 30 days.

/// Upstream login endpoint (`{email, password}` in, token pair out)
pub const LOGIN_PATH: &str = "/passport/login";

/// Upstream refresh endpoint (`{refresh_token}` in, new access token out)
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Lifetime of a stored refresh token in seconds (30 days)
pub const REFRESH_TOKEN_TTL_SECS: u64 = 60 * 60 * 24 * 30;

/// Name of the browser cookie carrying the session identifier
pub const SESSION_COOKIE: &str = "bff_session";

/// Raw byte length of a session identifier before encoding
pub const SESSION_ID_BYTES: usize = 32;
