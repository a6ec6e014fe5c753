//! Single-flight access token refresh
//!
//! When several requests for the same session hit a 401 at once, only the
//! first one (the initiator) calls the upstream refresh endpoint. Everyone else
//! awaits the initiator's shared future and observes the identical outcome.
//!
//! Ordering within one refresh cycle:
//! 1. Credential written to (or cleared from) the session store
//! 2. Pending slot released, so the next 401 starts a fresh cycle
//! 3. Outcome delivered to every waiter
//!
//! The cycle runs on its own task. Waiters only share its join handle, so a
//! cycle whose callers all went away still settles the store and frees the
//! slot. The slot is released by a drop guard owned by that task, so a panic
//! inside the cycle cannot leave the session wedged behind a dead refresh.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use futures_util::FutureExt;
use futures_util::future::Shared;
use session_auth::{CredentialStore, SessionId, now_millis};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Outcome shared by all waiters: the new access token, `None` when the
/// session must re-authenticate, or a store failure message.
type RefreshOutcome = std::result::Result<Option<Secret<String>>, String>;

type RefreshFuture = Shared<Pin<Box<dyn Future<Output = RefreshOutcome> + Send>>>;

struct Pending {
    generation: u64,
    future: RefreshFuture,
}

type Slots = Arc<Mutex<HashMap<SessionId, Pending>>>;

/// Deduplicates concurrent refresh attempts per session.
pub struct RefreshCoordinator {
    http: reqwest::Client,
    api_base: String,
    deadline: Duration,
    slots: Slots,
    next_generation: AtomicU64,
}

impl RefreshCoordinator {
    /// `deadline` bounds the upstream refresh call; expiry counts as failure.
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, deadline: Duration) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            deadline,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Obtain a new access token for the session behind `store`.
    ///
    /// Joins the in-flight refresh if one exists, otherwise starts one.
    /// Returns `Ok(None)` when the session has no usable refresh token or the
    /// upstream refused it; in the latter case the session has been cleared.
    pub async fn refresh(&self, store: &CredentialStore) -> Result<Option<Secret<String>>> {
        let future = {
            let mut slots = lock(&self.slots);
            match slots.get(store.session()) {
                Some(pending) => {
                    debug!(
                        generation = pending.generation,
                        "joining in-flight token refresh"
                    );
                    metrics::counter!("bff_refresh_joined_total").increment(1);
                    pending.future.clone()
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let release = SlotRelease {
                        slots: self.slots.clone(),
                        session: store.session().clone(),
                        generation,
                    };
                    let task = tokio::spawn(run_cycle(
                        self.http.clone(),
                        self.api_base.clone(),
                        self.deadline,
                        store.clone(),
                        release,
                    ));
                    let future = async move {
                        task.await
                            .unwrap_or_else(|e| Err(format!("refresh task failed: {e}")))
                    }
                    .boxed()
                    .shared();
                    slots.insert(
                        store.session().clone(),
                        Pending {
                            generation,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await.map_err(Error::Infrastructure)
    }

    /// Number of sessions with a refresh currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).len()
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<SessionId, Pending>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the session's pending slot when dropped, but only if the slot still
/// belongs to the cycle that created this guard.
struct SlotRelease {
    slots: Slots,
    session: SessionId,
    generation: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        if slots
            .get(&self.session)
            .is_some_and(|p| p.generation == self.generation)
        {
            slots.remove(&self.session);
        }
    }
}

async fn run_cycle(
    http: reqwest::Client,
    api_base: String,
    deadline: Duration,
    store: CredentialStore,
    release: SlotRelease,
) -> RefreshOutcome {
    let outcome = refresh_session(&http, &api_base, deadline, &store).await;
    drop(release);
    outcome
}

async fn refresh_session(
    http: &reqwest::Client,
    api_base: &str,
    deadline: Duration,
    store: &CredentialStore,
) -> RefreshOutcome {
    let current = store.read().await.map_err(|e| e.to_string())?;
    let Some(current) = current else {
        info!("no credential in session, refresh not possible");
        record_outcome("absent");
        return Ok(None);
    };
    let Some(refresh) = current.refresh(now_millis()).cloned() else {
        info!("refresh token expired, session must re-authenticate");
        record_outcome("absent");
        return clear_session(store).await;
    };

    info!("refreshing access token");
    let result = tokio::time::timeout(
        deadline,
        session_auth::refresh_token(http, api_base, refresh.expose()),
    )
    .await;

    match result {
        Ok(Ok(tokens)) => {
            let updated = current.rotated(tokens, now_millis());
            let access = updated.access_token.clone();
            store.write(updated).await.map_err(|e| e.to_string())?;
            info!("access token refreshed");
            record_outcome("success");
            Ok(Some(access))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "token refresh failed, clearing session");
            record_outcome("failure");
            clear_session(store).await
        }
        Err(_) => {
            warn!(
                deadline_secs = deadline.as_secs_f64(),
                "token refresh exceeded deadline, clearing session"
            );
            record_outcome("timeout");
            clear_session(store).await
        }
    }
}

async fn clear_session(store: &CredentialStore) -> RefreshOutcome {
    store.clear().await.map_err(|e| e.to_string())?;
    Ok(None)
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("bff_refresh_total", "outcome" => outcome).increment(1);
}
